// src/data.rs

use crate::error::CatalogError;
use crate::model::{Difficulty, Language, Question, QuestionId};
use log::info;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

const EMBEDDED_QUESTIONS: &str = include_str!("data/questions.yaml");

#[derive(Deserialize)]
struct CatalogFile {
    questions: Vec<Question>,
}

/// Read-only question bank, indexed by id and by (language, difficulty) group.
#[derive(Debug, Clone)]
pub struct Catalog {
    by_id: HashMap<QuestionId, Question>,
    groups: BTreeMap<(Language, Difficulty), Vec<QuestionId>>,
}

impl Catalog {
    /// Loads the question bank embedded in the binary.
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_yaml(EMBEDDED_QUESTIONS)
    }

    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_yaml(&content)?;
        info!("loaded {} questions from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn from_yaml(content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(content)?;
        Self::from_questions(file.questions)
    }

    pub fn from_questions(questions: Vec<Question>) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(questions.len());
        let mut groups: BTreeMap<(Language, Difficulty), Vec<QuestionId>> = BTreeMap::new();

        for question in questions {
            validate_question(&question)?;
            if by_id.contains_key(&question.id) {
                return Err(CatalogError::DuplicateId(question.id));
            }
            groups
                .entry((question.language, question.difficulty))
                .or_default()
                .push(question.id);
            by_id.insert(question.id, question);
        }

        // Id order is the unlock order
        for ids in groups.values_mut() {
            ids.sort_unstable();
        }

        Ok(Self { by_id, groups })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get_question(&self, id: QuestionId) -> Option<&Question> {
        self.by_id.get(&id)
    }

    /// Questions of one group, in unlock order.
    pub fn list_by_language_and_difficulty(
        &self,
        language: Language,
        difficulty: Difficulty,
    ) -> Vec<&Question> {
        self.group_ids(language, difficulty)
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .collect()
    }

    pub fn group_ids(&self, language: Language, difficulty: Difficulty) -> &[QuestionId] {
        self.groups
            .get(&(language, difficulty))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The question that must be solved before `id` unlocks, if any.
    pub fn predecessor(&self, id: QuestionId) -> Option<&Question> {
        let question = self.by_id.get(&id)?;
        let ids = self.group_ids(question.language, question.difficulty);
        let pos = ids.iter().position(|&q| q == id)?;
        if pos == 0 {
            return None;
        }
        self.by_id.get(&ids[pos - 1])
    }

    pub fn next_question(&self, id: QuestionId) -> Option<&Question> {
        let question = self.by_id.get(&id)?;
        let ids = self.group_ids(question.language, question.difficulty);
        let pos = ids.iter().position(|&q| q == id)?;
        ids.get(pos + 1).and_then(|next| self.by_id.get(next))
    }

    pub fn languages(&self) -> BTreeSet<Language> {
        self.groups.keys().map(|(language, _)| *language).collect()
    }

    pub fn hints(&self, id: QuestionId) -> Option<&[String]> {
        self.by_id.get(&id).map(|q| q.hints.as_slice())
    }
}

fn validate_question(question: &Question) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidQuestion {
        id: question.id,
        reason: reason.to_string(),
    };

    if question.title.trim().is_empty() {
        return Err(invalid("title is empty"));
    }
    if question.test_cases.is_empty() {
        return Err(invalid("no test cases"));
    }
    if question.test_cases.iter().any(|t| t.input.trim().is_empty()) {
        return Err(invalid("test case with empty input"));
    }
    Ok(())
}
