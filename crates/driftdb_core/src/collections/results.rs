use super::{impl_collection, out_of_bounds};
use crate::database::Database;
use crate::error::CoreResult;
use crate::object::Object;
use crate::record::Field;
use crate::snapshot::Snapshot;
use driftdb_codec::{ObjectKey, Value};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a [`Predicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Filter over an object's scalar properties, built programmatically.
///
/// Ordering comparisons only match values of the same kind; `Eq`/`Ne`
/// compare any two values.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `property <op> value`.
    Compare {
        /// Property to read.
        property: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand side.
        value: Value,
    },
    /// Every predicate matches.
    And(Vec<Predicate>),
    /// At least one predicate matches.
    Or(Vec<Predicate>),
    /// The predicate does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `property <op> value`.
    pub fn compare(property: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    /// `property == value`.
    pub fn equals(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Eq, value)
    }

    /// `property != value`.
    pub fn not_equals(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(property, CompareOp::Ne, value)
    }

    /// Both predicates match.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Either predicate matches.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub(crate) fn matches(&self, snapshot: &Snapshot, key: &ObjectKey) -> bool {
        match self {
            Predicate::Compare { property, op, value } => {
                let actual = scalar(snapshot, key, property);
                match op {
                    CompareOp::Eq | CompareOp::Ne => op.holds(actual.cmp(value)),
                    _ if actual.kind_name() == value.kind_name() => op.holds(actual.cmp(value)),
                    _ => false,
                }
            }
            Predicate::And(all) => all.iter().all(|p| p.matches(snapshot, key)),
            Predicate::Or(any) => any.iter().any(|p| p.matches(snapshot, key)),
            Predicate::Not(inner) => !inner.matches(snapshot, key),
        }
    }
}

impl std::ops::Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Self::Output {
        Predicate::Not(Box::new(self))
    }
}

/// Visible scalar value of a property; collections and unknown names read as `Null`.
fn scalar(snapshot: &Snapshot, key: &ObjectKey, property: &str) -> Value {
    match snapshot.field(key, property) {
        Some(Field::Value(register)) => snapshot.visible_value(&register.value),
        _ => Value::Null,
    }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Property to sort by.
    pub property: String,
    /// Ascending if true.
    pub ascending: bool,
}

/// Live query over the objects of one class.
///
/// Results are re-evaluated against the handle's current view on every
/// access. Without a sort, objects appear in creation order.
#[derive(Clone)]
pub struct Results {
    db: Database,
    class: String,
    predicate: Option<Predicate>,
    sort: Vec<SortKey>,
}

impl Results {
    pub(crate) fn new(db: Database, class: &str) -> Self {
        Self {
            db,
            class: class.to_owned(),
            predicate: None,
            sort: Vec::new(),
        }
    }

    pub(crate) fn from_parts(
        db: Database,
        class: String,
        predicate: Option<Predicate>,
        sort: Vec<SortKey>,
    ) -> Self {
        Self {
            db,
            class,
            predicate,
            sort,
        }
    }

    pub(crate) fn parts(&self) -> (&str, Option<&Predicate>, &[SortKey]) {
        (&self.class, self.predicate.as_ref(), &self.sort)
    }

    /// Returns the queried class.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Returns the handle these results are read through.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Narrows the results. Combined with any existing filter by `And`.
    #[must_use]
    pub fn filter(&self, predicate: Predicate) -> Results {
        let mut next = self.clone();
        next.predicate = Some(match next.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        next
    }

    /// Sorts by one property, replacing any previous sort.
    #[must_use]
    pub fn sorted(&self, property: impl Into<String>, ascending: bool) -> Results {
        self.sorted_by(vec![SortKey {
            property: property.into(),
            ascending,
        }])
    }

    /// Sorts by several properties in priority order.
    #[must_use]
    pub fn sorted_by(&self, keys: Vec<SortKey>) -> Results {
        let mut next = self.clone();
        next.sort = keys;
        next
    }

    /// Returns true if the handle was closed.
    pub fn is_invalidated(&self) -> bool {
        self.db.is_closed()
    }

    fn keys(&self) -> CoreResult<Vec<ObjectKey>> {
        self.db.read(|s| {
            let mut keys: Vec<ObjectKey> = s
                .keys_of(&self.class)
                .into_iter()
                .filter(|key| self.predicate.as_ref().map_or(true, |p| p.matches(s, key)))
                .collect();
            if !self.sort.is_empty() {
                keys.sort_by(|a, b| {
                    self.sort
                        .iter()
                        .map(|k| {
                            let ordering = scalar(s, a, &k.property).cmp(&scalar(s, b, &k.property));
                            if k.ascending {
                                ordering
                            } else {
                                ordering.reverse()
                            }
                        })
                        .find(|o| o.is_ne())
                        .unwrap_or(Ordering::Equal)
                });
            }
            keys
        })
    }

    /// Number of matching objects.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Returns true if nothing matches.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Object at `index`.
    pub fn get(&self, index: usize) -> CoreResult<Object> {
        let keys = self.keys()?;
        let len = keys.len();
        keys.into_iter()
            .nth(index)
            .map(|key| Object::new(self.db.clone(), key))
            .ok_or_else(|| out_of_bounds(index, len))
    }

    /// First matching object.
    pub fn first(&self) -> CoreResult<Option<Object>> {
        Ok(self
            .keys()?
            .into_iter()
            .next()
            .map(|key| Object::new(self.db.clone(), key)))
    }

    /// Position of `object` in the results.
    pub fn index_of(&self, object: &Object) -> CoreResult<Option<usize>> {
        Ok(self.keys()?.iter().position(|k| k == object.key()))
    }

    /// All matching objects.
    pub fn to_vec(&self) -> CoreResult<Vec<Object>> {
        Ok(self
            .keys()?
            .into_iter()
            .map(|key| Object::new(self.db.clone(), key))
            .collect())
    }

    /// Iterates over the matching objects.
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<Object>> {
        Ok(self.to_vec()?.into_iter())
    }
}

impl_collection!(Results, Object);

impl fmt::Debug for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("class", &self.class)
            .field("predicate", &self.predicate)
            .field("sort", &self.sort)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassSchema, Schema};
    use crate::{Config, Registry};
    use driftdb_codec::ValueType;

    fn populated(registry: &Registry) -> Database {
        let schema = Schema::new().class(
            ClassSchema::new("Row")
                .field("label", ValueType::String)
                .field("rank", ValueType::Int),
        );
        let db = Database::open(registry, Config::in_memory("results").schema(schema)).unwrap();
        db.write(|db| {
            for (label, rank) in [("A", 3_i64), ("B", 1), ("C", 2), ("D", 1)] {
                db.create("Row", [("label", Value::from(label)), ("rank", Value::from(rank))])?;
            }
            Ok(())
        })
        .unwrap();
        db
    }

    fn labels(results: &Results) -> Vec<String> {
        results
            .to_vec()
            .unwrap()
            .iter()
            .map(|o| o.get("label").unwrap().as_str().unwrap_or_default().to_owned())
            .collect()
    }

    #[test]
    fn creation_order_by_default() {
        let registry = Registry::new();
        let db = populated(&registry);
        assert_eq!(labels(&db.objects("Row").unwrap()), ["A", "B", "C", "D"]);
    }

    #[test]
    fn filter_and_sort() {
        let registry = Registry::new();
        let db = populated(&registry);
        let rows = db.objects("Row").unwrap();

        let not_c = rows.filter(Predicate::not_equals("label", "C"));
        assert_eq!(not_c.len().unwrap(), 3);

        let low = rows
            .filter(Predicate::compare("rank", CompareOp::Le, 2_i64))
            .sorted("rank", false);
        assert_eq!(labels(&low), ["C", "B", "D"]);

        let by_rank_then_label = rows.sorted_by(vec![
            SortKey {
                property: "rank".into(),
                ascending: true,
            },
            SortKey {
                property: "label".into(),
                ascending: false,
            },
        ]);
        assert_eq!(labels(&by_rank_then_label), ["D", "B", "C", "A"]);
    }

    #[test]
    fn combinators() {
        let registry = Registry::new();
        let db = populated(&registry);
        let rows = db.objects("Row").unwrap();

        let either = Predicate::equals("label", "A").or(Predicate::equals("label", "D"));
        assert_eq!(labels(&rows.filter(either.clone())), ["A", "D"]);
        assert_eq!(labels(&rows.filter(!either)), ["B", "C"]);

        let mismatched_kind = Predicate::compare("rank", CompareOp::Gt, "x");
        assert!(rows.filter(mismatched_kind).is_empty().unwrap());
    }

    #[test]
    fn results_are_live() {
        let registry = Registry::new();
        let db = populated(&registry);
        let ones = db.objects("Row").unwrap().filter(Predicate::equals("rank", 1_i64));
        assert_eq!(ones.len().unwrap(), 2);

        let first = ones.first().unwrap().unwrap();
        db.write(|_| first.set("rank", 5_i64)).unwrap();
        assert_eq!(ones.len().unwrap(), 1);
        assert_eq!(ones.index_of(&first).unwrap(), None);
    }
}
