//! Lock and completion rules, computed from a solved set and the catalog only.

use crate::data::Catalog;
use crate::model::{Difficulty, Language, QuestionId};
use std::collections::BTreeSet;

/// `None` when the question is not in the catalog.
pub fn is_locked(catalog: &Catalog, solved: &BTreeSet<QuestionId>, question_id: QuestionId) -> Option<bool> {
    catalog.get_question(question_id)?;
    // The first question of a group is never locked
    Some(match catalog.predecessor(question_id) {
        Some(previous) => !solved.contains(&previous.id),
        None => false,
    })
}

/// An empty group is never complete.
pub fn is_group_complete(
    catalog: &Catalog,
    solved: &BTreeSet<QuestionId>,
    language: Language,
    difficulty: Difficulty,
) -> bool {
    let ids = catalog.group_ids(language, difficulty);
    !ids.is_empty() && ids.iter().all(|id| solved.contains(id))
}

pub fn unlocked_in_group(
    catalog: &Catalog,
    solved: &BTreeSet<QuestionId>,
    language: Language,
    difficulty: Difficulty,
) -> Vec<QuestionId> {
    catalog
        .group_ids(language, difficulty)
        .iter()
        .copied()
        .filter(|&id| is_locked(catalog, solved, id) == Some(false))
        .collect()
}

/// Solved questions that still exist in the catalog for `language`.
pub fn solved_count(catalog: &Catalog, solved: &BTreeSet<QuestionId>, language: Language) -> usize {
    solved
        .iter()
        .filter(|id| {
            catalog
                .get_question(**id)
                .is_some_and(|q| q.language == language)
        })
        .count()
}
