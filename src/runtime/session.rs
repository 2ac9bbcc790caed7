//! The session: identity cache, changelog and endpoint in one owned value.
//!
//! Entities move through `clean → dirty → clean` via mutators and commit;
//! `delete` and `merge` make a handle terminally deleted. Every store
//! round-trip is blocking and goes through the [`SparqlEndpoint`] trait.

use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::cell::RefCell;

use oxigraph::model::{NamedNode, Term};

use crate::config::SessionConfig;
use crate::error::{EntityResult, RuntimeError, RuntimeResult};
use crate::model::{EntityDefinition, PropertyPlan};
use crate::synth::{Bindings, Template, TemplateKey, UpdateTemplate, NEW, OLD, THIS};

use super::changelog::{ChangeDescriptor, Changelog, ValueChange};
use super::class::EntityClass;
use super::endpoint::{HttpEndpoint, Solution, SparqlEndpoint};
use super::entity::{EntityHandle, EntityState, FieldValue};
use super::integrity::{run_checks, IntegrityListener};

/// Single-threaded unit of work against one endpoint.
pub struct Session {
    config: SessionConfig,
    endpoint: Box<dyn SparqlEndpoint>,
    classes: BTreeMap<String, Rc<EntityClass>>,
    cache: HashMap<NamedNode, Weak<RefCell<EntityState>>>,
    /// Strong references keep dirty handles cached until commit.
    dirty: HashMap<NamedNode, EntityHandle>,
    changelog: Changelog,
}

impl Session {
    pub fn new(config: SessionConfig, endpoint: impl SparqlEndpoint + 'static) -> Self {
        Self {
            config,
            endpoint: Box::new(endpoint),
            classes: BTreeMap::new(),
            cache: HashMap::new(),
            dirty: HashMap::new(),
            changelog: Changelog::new(),
        }
    }

    /// A session talking HTTP to the configured endpoint.
    pub fn connect(config: SessionConfig) -> Self {
        let endpoint = HttpEndpoint::new(&config.endpoint);
        Self::new(config, endpoint)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &dyn SparqlEndpoint {
        &*self.endpoint
    }

    pub fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    // -----------------------------------------------------------------------
    // Classes and validation
    // -----------------------------------------------------------------------

    /// Build a class and, when configured, validate the store against it.
    ///
    /// A violation at registration is fatal and the class is not registered.
    pub fn register(&mut self, definition: EntityDefinition) -> EntityResult<Rc<EntityClass>> {
        let class = Rc::new(EntityClass::build(definition, &self.config.analysis)?);
        if self.config.validate_on_register {
            let violations = run_checks(class.name(), class.checks(), &*self.endpoint)?;
            if let Some(first) = violations.first() {
                return Err(RuntimeError::IntegrityViolation {
                    class: first.class.clone(),
                    check: first.check.clone(),
                    count: first.offenders.len(),
                }
                .into());
            }
        }
        tracing::info!(class = %class.name(), "registered entity class");
        self.classes.insert(class.name().to_string(), Rc::clone(&class));
        Ok(class)
    }

    pub fn class(&self, name: &str) -> RuntimeResult<Rc<EntityClass>> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownClass {
                name: name.to_string(),
            })
    }

    /// Re-run a class's checks, reporting violations instead of failing.
    pub fn revalidate(&self, class: &str, listener: &mut dyn IntegrityListener) -> RuntimeResult<usize> {
        let class = self.class(class)?;
        let violations = run_checks(class.name(), class.checks(), &*self.endpoint)?;
        for violation in &violations {
            listener.on_violation(violation);
        }
        Ok(violations.len())
    }

    // -----------------------------------------------------------------------
    // Identity cache
    // -----------------------------------------------------------------------

    fn cached(&self, uri: &NamedNode) -> Option<EntityHandle> {
        self.cache
            .get(uri)
            .and_then(Weak::upgrade)
            .map(EntityHandle::from_rc)
    }

    fn adopt(&mut self, state: EntityState) -> EntityHandle {
        let uri = state.uri.clone();
        let handle = EntityHandle::new(state);
        self.cache.insert(uri, handle.downgrade());
        handle
    }

    pub fn is_cached(&self, uri: &NamedNode) -> bool {
        self.cached(uri).is_some()
    }

    /// Number of cache entries, live or not yet pruned.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Drop cache entries nobody holds any more. Dirty handles are held by
    /// the session itself and survive. Commit and bulk loads do this too.
    pub fn evict_unreferenced(&mut self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, weak| weak.strong_count() > 0);
        let evicted = before - self.cache.len();
        tracing::debug!(evicted, "evicted unreferenced handles");
        evicted
    }

    fn mark_dirty(&mut self, handle: &EntityHandle) {
        handle.state_mut().dirty = true;
        self.dirty.insert(handle.uri(), handle.clone());
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// The handle for `uri`: the cached one when alive, otherwise fetched.
    pub fn load(&mut self, class: &str, uri: &NamedNode) -> RuntimeResult<EntityHandle> {
        let class = self.class(class)?;
        if let Some(handle) = self.cached(uri) {
            if !Rc::ptr_eq(&handle.class(), &class) {
                return Err(RuntimeError::ClassMismatch {
                    left: uri.to_string(),
                    left_class: handle.class_name(),
                    right: uri.to_string(),
                    right_class: class.name().to_string(),
                });
            }
            return Ok(handle);
        }
        let rows = self.endpoint.select(&class.canonical_query(Some(uri), None))?;
        let rows: Vec<Solution> = class
            .group_rows(rows)
            .into_iter()
            .filter(|(anchor, _)| anchor == uri)
            .flat_map(|(_, rows)| rows)
            .collect();
        if rows.is_empty() {
            return Err(RuntimeError::LoadMiss {
                class: class.name().to_string(),
                uri: uri.to_string(),
            });
        }
        let fields = class.materialize(uri, &rows);
        tracing::info!(class = %class.name(), entity = %uri, "loaded entity");
        Ok(self.adopt(EntityState {
            uri: uri.clone(),
            class,
            fields,
            dirty: false,
            deleted: false,
        }))
    }

    /// Resolve an entity-reference field to handles.
    pub fn references(&mut self, handle: &EntityHandle, field: &str) -> RuntimeResult<Vec<EntityHandle>> {
        let class = handle.class();
        let plan = class.plan(field)?;
        if !plan.entity_ref {
            return Err(RuntimeError::TypeMismatch {
                field: field.to_string(),
                expected: "entity reference".into(),
                value: plan.value_type.name().into(),
            });
        }
        let target = plan.target_class.clone().unwrap_or_else(|| class.name().to_string());
        handle
            .values(field)
            .into_iter()
            .map(|term| match term {
                Term::NamedNode(uri) => self.load(&target, &uri),
                other => Err(RuntimeError::TypeMismatch {
                    field: field.to_string(),
                    expected: "iri".into(),
                    value: other.to_string(),
                }),
            })
            .collect()
    }

    /// Flush, then load every entity the class's read query matches.
    pub fn commit_and_load_all(&mut self, class: &str) -> RuntimeResult<Vec<EntityHandle>> {
        self.commit()?;
        self.load_matching(class, None)
    }

    /// Flush, then load the entities matching a SPARQL filter expression over
    /// the read query's variables.
    pub fn commit_and_load_selected(&mut self, class: &str, filter: &str) -> RuntimeResult<Vec<EntityHandle>> {
        self.commit()?;
        self.load_matching(class, Some(filter))
    }

    fn load_matching(&mut self, class: &str, filter: Option<&str>) -> RuntimeResult<Vec<EntityHandle>> {
        let class = self.class(class)?;
        self.evict_unreferenced();
        let rows = self.endpoint.select(&class.canonical_query(None, filter))?;
        let mut handles = Vec::new();
        for (uri, rows) in class.group_rows(rows) {
            let fields = class.materialize(&uri, &rows);
            let handle = match self.cached(&uri) {
                Some(handle) => {
                    if !handle.is_dirty() {
                        handle.state_mut().fields = fields;
                    }
                    handle
                }
                None => self.adopt(EntityState {
                    uri,
                    class: Rc::clone(&class),
                    fields,
                    dirty: false,
                    deleted: false,
                }),
            };
            handles.push(handle);
        }
        tracing::info!(class = %class.name(), count = handles.len(), "loaded entities");
        Ok(handles)
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Send the whole changelog as one update request.
    ///
    /// On failure nothing is cleared, so the same commit can be retried.
    pub fn commit(&mut self) -> RuntimeResult<()> {
        if self.changelog.is_empty() {
            tracing::debug!("nothing to commit");
            return Ok(());
        }
        let request = self.changelog.render();
        tracing::debug!(request = %request, "committing");
        self.endpoint.update(&request)?;

        tracing::info!(
            changes = self.changelog.len(),
            entities = self.dirty.len(),
            "committed"
        );
        self.changelog.clear();
        for (uri, handle) in self.dirty.drain() {
            let deleted = {
                let mut state = handle.state_mut();
                state.dirty = false;
                state.deleted
            };
            if deleted {
                self.cache.remove(&uri);
            }
        }
        self.evict_unreferenced();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------------

    fn ensure_live(handle: &EntityHandle) -> RuntimeResult<()> {
        if handle.is_deleted() {
            return Err(RuntimeError::MutationOnDeleted {
                uri: handle.uri().to_string(),
            });
        }
        Ok(())
    }

    fn check_type(plan: &PropertyPlan, value: &Term) -> RuntimeResult<()> {
        if plan.value_type.accepts(value) {
            Ok(())
        } else {
            Err(RuntimeError::TypeMismatch {
                field: plan.field.clone(),
                expected: plan.value_type.name().into(),
                value: value.to_string(),
            })
        }
    }

    fn render(class: &EntityClass, key: &TemplateKey, bindings: &Bindings) -> RuntimeResult<String> {
        class.template(key)?.render(bindings)
    }

    /// Queue a new entity. Required single-valued properties must all be
    /// supplied; a field may repeat for multi-valued properties.
    pub fn create(&mut self, class: &str, uri: &NamedNode, values: &[(&str, Term)]) -> RuntimeResult<EntityHandle> {
        if self.cached(uri).is_some() {
            return Err(RuntimeError::AlreadyExists { uri: uri.to_string() });
        }
        let class = self.class(class)?;

        let mut fields: BTreeMap<String, FieldValue> = class
            .plans()
            .iter()
            .map(|plan| {
                let empty = if plan.functional {
                    FieldValue::Single(None)
                } else {
                    FieldValue::Many(Vec::new())
                };
                (plan.field.clone(), empty)
            })
            .collect();
        for (field, value) in values {
            let plan = class.plan(field)?;
            Self::check_type(plan, value)?;
            match fields.get_mut(*field) {
                Some(FieldValue::Single(slot @ None)) => *slot = Some(value.clone()),
                Some(FieldValue::Single(Some(_))) => {
                    return Err(RuntimeError::CardinalityMismatch {
                        field: plan.field.clone(),
                        expected: "multi-valued",
                        actual: "single-valued",
                    });
                }
                Some(FieldValue::Many(list)) => {
                    if !list.contains(value) {
                        list.push(value.clone());
                    }
                }
                None => {}
            }
        }

        let mut bindings = Bindings::new().with(THIS, uri.clone());
        for plan in class.plans().iter().filter(|p| p.functional) {
            match fields.get(&plan.field).and_then(FieldValue::as_single) {
                Some(value) => bindings.set(plan.variable.clone(), value.clone()),
                None if !plan.nullable => {
                    return Err(RuntimeError::MissingValue {
                        name: plan.field.clone(),
                    });
                }
                None => {}
            }
        }

        let mut parts: Vec<&Template> = vec![class.template(&TemplateKey::Creation)?];
        for plan in class.plans().iter().filter(|p| p.functional && p.nullable) {
            if bindings.contains(&plan.variable) {
                let init = class.template(&TemplateKey::Init(plan.variable.clone()))?;
                // Properties sharing a block share one initializer.
                if !parts.contains(&init) {
                    parts.push(init);
                }
            }
        }
        // Data-only parts share blank node labels and go out as one
        // INSERT DATA; the rest run after it, in order.
        let (data, rest): (Vec<&Template>, Vec<&Template>) = parts
            .into_iter()
            .partition(|t| t.as_update().is_some_and(|u| u.data));
        let mut operations = Vec::new();
        if !data.is_empty() {
            let merged = UpdateTemplate::merge_data(data.iter().filter_map(|t| t.as_update()));
            operations.push(Template::Update(merged).render(&bindings)?);
        }
        for part in rest {
            operations.push(part.render(&bindings)?);
        }
        let update = operations.join(" ;\n");

        let mut additions = Vec::new();
        for plan in class.plans().iter().filter(|p| !p.functional) {
            for value in fields.get(&plan.field).map(FieldValue::terms).unwrap_or_default() {
                additions.push(self.value_change(&class, plan, uri, None, Some(value))?);
            }
        }

        self.changelog.push(ChangeDescriptor::CreateEntity {
            uri: uri.clone(),
            update,
        });
        for change in additions {
            self.changelog.push(ChangeDescriptor::AddValue(change));
        }
        let handle = self.adopt(EntityState {
            uri: uri.clone(),
            class: Rc::clone(&class),
            fields,
            dirty: true,
            deleted: false,
        });
        self.dirty.insert(uri.clone(), handle.clone());
        tracing::debug!(class = %class.name(), entity = %uri, "queued creation");
        Ok(handle)
    }

    /// The store-level edit for one value of a property.
    fn value_change(
        &self,
        class: &EntityClass,
        plan: &PropertyPlan,
        uri: &NamedNode,
        old: Option<&Term>,
        new: Option<&Term>,
    ) -> RuntimeResult<ValueChange> {
        if let Some(predicate) = class.simple_predicate(plan) {
            return Ok(ValueChange::Direct {
                subject: uri.clone(),
                predicate,
                old: old.cloned(),
                new: new.cloned(),
            });
        }
        let v = plan.variable.clone();
        let mut bindings = Bindings::new().with(THIS, uri.clone());
        if let Some(old) = old {
            bindings.set(OLD, old.clone());
        }
        if let Some(new) = new {
            bindings.set(NEW, new.clone());
        }
        let key = match (old, new) {
            (Some(_), Some(_)) => TemplateKey::Change(v),
            (Some(_), None) => TemplateKey::Remove(v),
            (None, _) => TemplateKey::Add(v),
        };
        Ok(ValueChange::Rendered(Self::render(class, &key, &bindings)?))
    }

    /// Whether another value already lives in the optional block `plan`'s
    /// value belongs to, so its structure exists in the store.
    fn block_populated(handle: &EntityHandle, plan: &PropertyPlan) -> bool {
        let class = handle.class();
        let analysis = class.analysis();
        let defining = analysis.defining_context(&plan.variable);
        class.plans().iter().any(|other| {
            other.variable != plan.variable
                && analysis.defining_context(&other.variable) == defining
                && handle
                    .get(&other.field)
                    .is_some_and(|value| !value.terms().is_empty())
        })
    }

    /// Set a single-valued property; `None` clears a nullable one.
    pub fn set(&mut self, handle: &EntityHandle, field: &str, value: Option<Term>) -> RuntimeResult<()> {
        Self::ensure_live(handle)?;
        let class = handle.class();
        let plan = class.plan(field)?;
        if !plan.functional {
            return Err(RuntimeError::CardinalityMismatch {
                field: field.to_string(),
                expected: "single-valued",
                actual: "multi-valued",
            });
        }
        match &value {
            Some(value) => Self::check_type(plan, value)?,
            None if !plan.nullable => {
                return Err(RuntimeError::MissingValue {
                    name: field.to_string(),
                });
            }
            None => {}
        }
        let old = handle.single(field);
        if old == value {
            return Ok(());
        }

        let uri = handle.uri();
        let change = match (&old, &value) {
            (None, Some(new)) if class.simple_predicate(plan).is_none() && !Self::block_populated(handle, plan) => {
                // Nothing to hang the value on yet: build the block.
                let mut bindings = Bindings::new().with(THIS, uri.clone());
                for other in class.plans().iter().filter(|p| p.functional) {
                    if let Some(current) = handle.single(&other.field) {
                        bindings.set(other.variable.clone(), current);
                    }
                }
                bindings.set(plan.variable.clone(), new.clone());
                let key = TemplateKey::Init(plan.variable.clone());
                ValueChange::Rendered(Self::render(&class, &key, &bindings)?)
            }
            _ => self.value_change(&class, plan, &uri, old.as_ref(), value.as_ref())?,
        };

        self.changelog.push(match (&old, &value) {
            (None, _) => ChangeDescriptor::AddValue(change),
            (_, None) => ChangeDescriptor::RemoveValue(change),
            _ => ChangeDescriptor::ChangeValue(change),
        });
        handle
            .state_mut()
            .fields
            .insert(field.to_string(), FieldValue::Single(value));
        self.mark_dirty(handle);
        Ok(())
    }

    fn many_plan<'c>(class: &'c EntityClass, field: &str) -> RuntimeResult<&'c PropertyPlan> {
        let plan = class.plan(field)?;
        if plan.functional {
            return Err(RuntimeError::CardinalityMismatch {
                field: field.to_string(),
                expected: "multi-valued",
                actual: "single-valued",
            });
        }
        Ok(plan)
    }

    /// Add one value to a multi-valued property.
    pub fn add(&mut self, handle: &EntityHandle, field: &str, value: Term) -> RuntimeResult<()> {
        Self::ensure_live(handle)?;
        let class = handle.class();
        let plan = Self::many_plan(&class, field)?;
        Self::check_type(plan, &value)?;
        if handle.values(field).contains(&value) {
            return Ok(());
        }
        let change = self.value_change(&class, plan, &handle.uri(), None, Some(&value))?;
        self.changelog.push(ChangeDescriptor::AddValue(change));
        if let Some(FieldValue::Many(list)) = handle.state_mut().fields.get_mut(field) {
            list.push(value);
        }
        self.mark_dirty(handle);
        Ok(())
    }

    /// Remove one value from a multi-valued property.
    pub fn remove(&mut self, handle: &EntityHandle, field: &str, value: &Term) -> RuntimeResult<()> {
        Self::ensure_live(handle)?;
        let class = handle.class();
        let plan = Self::many_plan(&class, field)?;
        if !handle.values(field).contains(value) {
            return Ok(());
        }
        let change = self.value_change(&class, plan, &handle.uri(), Some(value), None)?;
        self.changelog.push(ChangeDescriptor::RemoveValue(change));
        if let Some(FieldValue::Many(list)) = handle.state_mut().fields.get_mut(field) {
            list.retain(|v| v != value);
        }
        self.mark_dirty(handle);
        Ok(())
    }

    /// Delete the entity and everything naming it.
    pub fn delete(&mut self, handle: &EntityHandle) -> RuntimeResult<()> {
        Self::ensure_live(handle)?;
        self.changelog.push(ChangeDescriptor::DeleteEntity { uri: handle.uri() });
        handle.state_mut().deleted = true;
        self.mark_dirty(handle);
        Ok(())
    }

    /// Fold `other` into `target`, then delete `other` and point its incoming
    /// references at `target`.
    pub fn merge(&mut self, target: &EntityHandle, other: &EntityHandle) -> RuntimeResult<()> {
        Self::ensure_live(target)?;
        Self::ensure_live(other)?;
        if target.ptr_eq(other) {
            return Ok(());
        }
        let class = target.class();
        if !Rc::ptr_eq(&class, &other.class()) {
            return Err(RuntimeError::ClassMismatch {
                left: target.uri().to_string(),
                left_class: class.name().to_string(),
                right: other.uri().to_string(),
                right_class: other.class_name(),
            });
        }

        // A failed copy leaves neither the changelog nor the target changed.
        let checkpoint = self.changelog.len();
        let (saved, was_dirty) = {
            let state = target.state();
            (state.fields.clone(), state.dirty)
        };
        if let Err(err) = self.copy_values(&class, target, other) {
            self.changelog.truncate(checkpoint);
            {
                let mut state = target.state_mut();
                state.fields = saved;
                state.dirty = was_dirty;
            }
            if !was_dirty {
                self.dirty.remove(&target.uri());
            }
            return Err(err);
        }

        let (from, to) = (other.uri(), target.uri());
        self.changelog.push(ChangeDescriptor::DeleteAndRedirect {
            uri: from.clone(),
            target: to.clone(),
        });
        other.state_mut().deleted = true;
        self.mark_dirty(other);
        self.redirect_cached(&Term::from(from), &Term::from(to));
        tracing::debug!(entity = %target.uri(), merged = %other.uri(), "queued merge");
        Ok(())
    }

    fn copy_values(&mut self, class: &EntityClass, target: &EntityHandle, other: &EntityHandle) -> RuntimeResult<()> {
        for plan in class.plans() {
            if plan.functional {
                // Required values are copied as-is, nullable ones only when set.
                if let Some(value) = other.single(&plan.field) {
                    self.set(target, &plan.field, Some(value))?;
                }
            } else {
                for value in other.values(&plan.field) {
                    self.add(target, &plan.field, value)?;
                }
            }
        }
        Ok(())
    }

    /// Rewrite reference values held by cached handles.
    fn redirect_cached(&self, from: &Term, to: &Term) {
        for handle in self.cache.values().filter_map(Weak::upgrade).map(EntityHandle::from_rc) {
            let class = handle.class();
            let mut state = handle.state_mut();
            for plan in class.plans().iter().filter(|p| p.entity_ref) {
                match state.fields.get_mut(&plan.field) {
                    Some(FieldValue::Single(Some(value))) if value == from => *value = to.clone(),
                    Some(FieldValue::Many(list)) if list.contains(from) => {
                        list.retain(|v| v != from);
                        if !list.contains(to) {
                            list.push(to.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}
