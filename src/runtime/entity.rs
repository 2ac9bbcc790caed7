//! Entity handles: shared, identity-cached views of one stored entity.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use oxigraph::model::{NamedNode, Term};

use super::class::EntityClass;

/// The value(s) of one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Single(Option<Term>),
    Many(Vec<Term>),
}

impl FieldValue {
    pub fn as_single(&self) -> Option<&Term> {
        match self {
            FieldValue::Single(value) => value.as_ref(),
            FieldValue::Many(_) => None,
        }
    }

    pub fn terms(&self) -> &[Term] {
        match self {
            FieldValue::Single(Some(value)) => std::slice::from_ref(value),
            FieldValue::Single(None) => &[],
            FieldValue::Many(values) => values,
        }
    }

    pub fn contains(&self, term: &Term) -> bool {
        self.terms().contains(term)
    }
}

#[derive(Debug)]
pub(crate) struct EntityState {
    pub uri: NamedNode,
    pub class: Rc<EntityClass>,
    /// Keyed by field name.
    pub fields: BTreeMap<String, FieldValue>,
    pub dirty: bool,
    pub deleted: bool,
}

/// A live entity. Clones share state; the session hands out one handle per
/// URI while any clone of it is alive.
#[derive(Clone)]
pub struct EntityHandle(Rc<RefCell<EntityState>>);

impl EntityHandle {
    pub(crate) fn new(state: EntityState) -> Self {
        Self(Rc::new(RefCell::new(state)))
    }

    pub(crate) fn from_rc(rc: Rc<RefCell<EntityState>>) -> Self {
        Self(rc)
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<EntityState>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn state(&self) -> Ref<'_, EntityState> {
        self.0.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, EntityState> {
        self.0.borrow_mut()
    }

    pub fn uri(&self) -> NamedNode {
        self.state().uri.clone()
    }

    pub fn class(&self) -> Rc<EntityClass> {
        Rc::clone(&self.state().class)
    }

    pub fn class_name(&self) -> String {
        self.state().class.name().to_string()
    }

    pub fn get(&self, field: &str) -> Option<FieldValue> {
        self.state().fields.get(field).cloned()
    }

    /// The value of a single-valued field.
    pub fn single(&self, field: &str) -> Option<Term> {
        self.state()
            .fields
            .get(field)
            .and_then(|v| v.as_single().cloned())
    }

    /// Every value of a field.
    pub fn values(&self, field: &str) -> Vec<Term> {
        self.state()
            .fields
            .get(field)
            .map(|v| v.terms().to_vec())
            .unwrap_or_default()
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    pub fn is_deleted(&self) -> bool {
        self.state().deleted
    }

    /// Same underlying entity, not just the same URI.
    pub fn ptr_eq(&self, other: &EntityHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("EntityHandle")
            .field("uri", &state.uri.as_str())
            .field("class", &state.class.name())
            .field("fields", &state.fields)
            .field("dirty", &state.dirty)
            .field("deleted", &state.deleted)
            .finish()
    }
}
