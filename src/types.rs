//! Shared identifiers and the unit model passed between stages.

use std::cmp::Ordering;
use std::fmt::{self, Display, Write};

/// Identifier issued to a milk unit by the generator.
pub type MilkId = u64;
/// Identity of a worker thread; 1-based and sequential across stages.
pub type WorkerId = u64;

/// Identifier derived from the ids of a unit's inputs.
///
/// Holds the decimal digits of the concatenated inputs, so it has no width
/// limit. Digits never start with `0`, which makes shorter ids numerically
/// smaller and lets ordering compare length first, then digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompositeId(String);

impl CompositeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimal digits.
    pub fn digits(&self) -> usize {
        self.0.len()
    }
}

impl Ord for CompositeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for CompositeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stage a worker belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Milk,
    Cheese,
    Burger,
}

impl Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Milk => "milk",
            StageKind::Cheese => "cheese",
            StageKind::Burger => "burger",
        };
        f.write_str(name)
    }
}

/// A raw unit produced by a milk worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MilkUnit {
    pub id: MilkId,
    pub producer: WorkerId,
}

/// Milk units combined by a cheese worker (three with the default ratios).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheeseUnit {
    pub id: CompositeId,
    /// Consumed milk ids, sorted ascending.
    pub milk: Vec<MilkId>,
    pub producer: WorkerId,
}

/// Cheese units combined by the burger worker (two with the default ratios).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BurgerUnit {
    pub id: CompositeId,
    /// Consumed cheese ids, sorted ascending.
    pub cheese: Vec<CompositeId>,
}

impl CheeseUnit {
    /// Build a cheese unit from the milk units taken in one batch.
    pub fn compose(inputs: &[MilkUnit], producer: WorkerId) -> Self {
        let mut milk: Vec<MilkId> = inputs.iter().map(|unit| unit.id).collect();
        milk.sort_unstable();
        let id = concat_digits(&milk, Some(producer));
        Self { id, milk, producer }
    }
}

impl BurgerUnit {
    /// Build a burger from the cheese units taken in one batch.
    pub fn compose(inputs: &[CheeseUnit]) -> Self {
        let mut cheese: Vec<CompositeId> = inputs.iter().map(|unit| unit.id.clone()).collect();
        cheese.sort_unstable();
        let id = concat_digits(&cheese, None);
        Self { id, cheese }
    }
}

/// Concatenate the decimal digits of `parts` and an optional suffix.
///
/// `parts` must already be sorted; the caller owns the ordering rule.
pub fn concat_digits<T: Display>(parts: &[T], suffix: Option<WorkerId>) -> CompositeId {
    let mut digits = String::new();
    for part in parts {
        // Writing into a String cannot fail.
        let _ = write!(digits, "{part}");
    }
    if let Some(suffix) = suffix {
        let _ = write!(digits, "{suffix}");
    }
    CompositeId(digits)
}
