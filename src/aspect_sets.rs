use serde::{Deserialize, Serialize};

use crate::chart::AspectSetId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AspectSet {
    pub id: AspectSetId,
    pub name: String,
}

/// Synastry sets are identified by the square of their single-chart set.
pub fn to_synastry(id: AspectSetId) -> Option<AspectSetId> {
    id.checked_mul(id)
}

fn integer_sqrt(value: AspectSetId) -> Option<AspectSetId> {
    if value < 0 {
        return None;
    }
    let root = f64::from(value).sqrt().round() as AspectSetId;
    (root.checked_mul(root) == Some(value)).then_some(root)
}

/// The aspect sets known to the calculation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectSetRegistry {
    sets: Vec<AspectSet>,
}

impl Default for AspectSetRegistry {
    fn default() -> Self {
        Self::new(vec![
            AspectSet {
                id: 1,
                name: "Classic".to_owned(),
            },
            AspectSet {
                id: 2,
                name: "Podvodny".to_owned(),
            },
            AspectSet {
                id: 4,
                name: "Podvodny (synastry)".to_owned(),
            },
        ])
    }
}

impl AspectSetRegistry {
    pub fn new(sets: Vec<AspectSet>) -> Self {
        Self { sets }
    }

    pub fn sets(&self) -> &[AspectSet] {
        &self.sets
    }

    pub fn contains(&self, id: AspectSetId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: AspectSetId) -> Option<&AspectSet> {
        self.sets.iter().find(|set| set.id == id)
    }

    /// Single-chart set whose square is `id`, if that set is registered.
    pub fn to_single(&self, id: AspectSetId) -> Option<AspectSetId> {
        integer_sqrt(id).filter(|root| self.contains(*root))
    }

    /// Synastry companion of `id`, only when it is registered.
    pub fn synastry_companion(&self, id: AspectSetId) -> Option<AspectSetId> {
        to_synastry(id).filter(|square| self.contains(*square))
    }
}
