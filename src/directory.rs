//! Directory lookups and the principal context built from them
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// The acting user together with the attributes policies look at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Principal {
    pub id: String,
    pub roles: BTreeSet<String>,
    pub department: Option<String>,
}

/// Organisation lookups. Implementations are expected to answer from their own
/// cache; none of these calls may block on I/O for long.
pub trait Directory: Send + Sync {
    fn roles_of(&self, principal_id: &str) -> BTreeSet<String>;
    fn department_of(&self, principal_id: &str) -> Option<String>;
    fn manager_of(&self, principal_id: &str) -> Option<String>;
    fn department_head(&self, department: &str) -> Option<String>;
    /// Members holding `role`, in a stable order.
    fn members_with_role(&self, role: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Default)]
struct Person {
    roles: BTreeSet<String>,
    department: Option<String>,
    manager: Option<String>,
}

/// In-memory directory, mutable at runtime so reorganisations can be modelled.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    people: RwLock<HashMap<String, Person>>,
    heads: RwLock<HashMap<String, String>>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }
    pub fn in_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
    /// Build the principal context for `id` from directory lookups.
    pub fn from_directory(id: &str, directory: &dyn Directory) -> Self {
        Self {
            id: id.to_string(),
            roles: directory.roles_of(id),
            department: directory.department_of(id),
        }
    }
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_person(
        self,
        id: &str,
        roles: &[&str],
        department: Option<&str>,
        manager: Option<&str>,
    ) -> Self {
        self.people.write().insert(
            id.to_string(),
            Person {
                roles: roles.iter().map(|r| r.to_string()).collect(),
                department: department.map(str::to_string),
                manager: manager.map(str::to_string),
            },
        );
        self
    }

    pub fn with_department_head(self, department: &str, head: &str) -> Self {
        self.set_department_head(department, head);
        self
    }

    pub fn set_manager(&self, id: &str, manager: Option<&str>) {
        self.people.write().entry(id.to_string()).or_default().manager =
            manager.map(str::to_string);
    }

    pub fn set_department_head(&self, department: &str, head: &str) {
        self.heads
            .write()
            .insert(department.to_string(), head.to_string());
    }

    pub fn grant_role(&self, id: &str, role: &str) {
        self.people
            .write()
            .entry(id.to_string())
            .or_default()
            .roles
            .insert(role.to_string());
    }

    pub fn revoke_role(&self, id: &str, role: &str) {
        if let Some(person) = self.people.write().get_mut(id) {
            person.roles.remove(role);
        }
    }
}

impl Directory for StaticDirectory {
    fn roles_of(&self, principal_id: &str) -> BTreeSet<String> {
        self.people
            .read()
            .get(principal_id)
            .map(|p| p.roles.clone())
            .unwrap_or_default()
    }

    fn department_of(&self, principal_id: &str) -> Option<String> {
        self.people
            .read()
            .get(principal_id)
            .and_then(|p| p.department.clone())
    }

    fn manager_of(&self, principal_id: &str) -> Option<String> {
        self.people
            .read()
            .get(principal_id)
            .and_then(|p| p.manager.clone())
    }

    fn department_head(&self, department: &str) -> Option<String> {
        self.heads.read().get(department).cloned()
    }

    fn members_with_role(&self, role: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .people
            .read()
            .iter()
            .filter(|(_, p)| p.roles.contains(role))
            .map(|(id, _)| id.clone())
            .collect();
        members.sort();
        members
    }
}
