//! Attribute updaters.

use super::record::{Attr, AttrValue};
use crate::store::{Entity, Table};
use pug_types::{Id, Kind};
use std::collections::HashMap;
use std::sync::Arc;

/// Entity types that refer to other entities.
///
/// Implemented explicitly by each entity type, so log enrichment can
/// follow references without inspecting fields at runtime. A task, for
/// instance, returns its module id and workspace id.
pub trait ProvidesEntityIds {
    fn entity_ids(&self) -> Vec<Id> {
        Vec::new()
    }
}

/// An entity looked up by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub label: String,
    /// Ids of the entities it refers to.
    pub refs: Vec<Id>,
}

/// Looks entities of one kind up by id.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, id: Id) -> Option<Resolved>;
}

impl<T> EntityResolver for Table<T>
where
    T: Entity + ProvidesEntityIds,
{
    fn resolve(&self, id: Id) -> Option<Resolved> {
        self.find(id).map(|row| Resolved {
            label: row.label(),
            refs: row.entity_ids(),
        })
    }
}

/// Rewrites a record's attributes before it is stored.
pub trait ArgUpdater: Send + Sync {
    fn update(&self, attrs: &mut Vec<Attr>);
}

/// Replaces ids with the entities they name.
///
/// An attribute holding an id, or text that parses as one, becomes
/// [`AttrValue::Entity`]. Entities the resolved one refers to are
/// appended under their kind's name (`module`, `workspace`, ...)
/// unless the record already has an attribute with that key.
#[derive(Default)]
pub struct ReferenceUpdater {
    resolvers: HashMap<Kind, Arc<dyn EntityResolver>>,
}

impl ReferenceUpdater {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the resolver for ids of `kind`.
    #[must_use]
    pub fn with(mut self, kind: Kind, resolver: Arc<dyn EntityResolver>) -> Self {
        self.resolvers.insert(kind, resolver);
        self
    }

    fn resolve(&self, id: Id) -> Option<Resolved> {
        self.resolvers.get(&id.kind())?.resolve(id)
    }
}

impl ArgUpdater for ReferenceUpdater {
    fn update(&self, attrs: &mut Vec<Attr>) {
        let mut refs = Vec::new();
        for attr in attrs.iter_mut() {
            let id = match &attr.value {
                AttrValue::Id(id) => *id,
                AttrValue::Text(text) => match text.parse::<Id>() {
                    Ok(id) => id,
                    Err(_) => continue,
                },
                AttrValue::Entity { .. } => continue,
            };
            match self.resolve(id) {
                Some(resolved) => {
                    attr.value = AttrValue::Entity {
                        id,
                        label: resolved.label,
                    };
                    refs.extend(resolved.refs);
                }
                None => attr.value = AttrValue::Id(id),
            }
        }

        for id in refs {
            let key = id.kind().as_str();
            if attrs.iter().any(|a| a.key == key) {
                continue;
            }
            let value = match self.resolve(id) {
                Some(resolved) => AttrValue::Entity {
                    id,
                    label: resolved.label,
                },
                None => AttrValue::Id(id),
            };
            attrs.push(Attr {
                key: key.to_string(),
                value,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use crate::workspace::Workspace;

    #[derive(Clone)]
    struct Job {
        id: Id,
        module_id: Id,
        workspace_id: Id,
    }

    impl Entity for Job {
        fn id(&self) -> Id {
            self.id
        }
        fn label(&self) -> String {
            "job".into()
        }
    }

    impl ProvidesEntityIds for Job {
        fn entity_ids(&self) -> Vec<Id> {
            vec![self.module_id, self.workspace_id]
        }
    }

    #[tokio::test]
    async fn replaces_ids_and_appends_references() {
        let modules = Arc::new(Table::new(8));
        let workspaces = Arc::new(Table::new(8));
        let jobs = Arc::new(Table::new(8));

        let module = modules.add(Module::new("envs/prod")).await;
        let ws = workspaces.add(Workspace::new("default", &module)).await;
        let job = jobs
            .add(Job {
                id: Id::new(Kind::Task),
                module_id: module.id,
                workspace_id: ws.id,
            })
            .await;

        let updater = ReferenceUpdater::new()
            .with(Kind::Module, modules)
            .with(Kind::Workspace, workspaces)
            .with(Kind::Task, jobs);

        let mut attrs = vec![
            Attr::text("task", job.id.to_string()),
            Attr::text("note", "hello"),
        ];
        updater.update(&mut attrs);

        assert_eq!(
            attrs[0].value,
            AttrValue::Entity {
                id: job.id,
                label: "job".into()
            }
        );
        assert_eq!(attrs[1].value, AttrValue::Text("hello".into()));
        assert_eq!(attrs[2].key, "module");
        assert_eq!(attrs[2].value.to_string(), "envs/prod");
        assert_eq!(attrs[3].key, "workspace");
        assert_eq!(attrs[3].value.to_string(), "envs/prod:default");
    }

    #[tokio::test]
    async fn existing_keys_are_not_duplicated() {
        let modules = Arc::new(Table::new(8));
        let workspaces = Arc::new(Table::new(8));
        let module = modules.add(Module::new("a")).await;
        let ws = workspaces.add(Workspace::new("dev", &module)).await;

        let updater = ReferenceUpdater::new()
            .with(Kind::Module, modules)
            .with(Kind::Workspace, workspaces);

        let mut attrs = vec![Attr::id("workspace", ws.id), Attr::id("module", module.id)];
        updater.update(&mut attrs);
        assert_eq!(attrs.len(), 2);
        assert!(matches!(attrs[1].value, AttrValue::Entity { .. }));
    }

    #[test]
    fn unknown_ids_stay_ids() {
        let updater = ReferenceUpdater::new();
        let id = Id::new(Kind::Plan);
        let mut attrs = vec![Attr::text("plan", id.to_string())];
        updater.update(&mut attrs);
        assert_eq!(attrs[0].value, AttrValue::Id(id));
    }
}
