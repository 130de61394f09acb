use std::collections::HashSet;

use parking_lot::RwLock;

use crate::clients::ClientId;

/// A named set of permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    name: String,
    permissions: HashSet<String>,
}

impl Role {
    pub fn new(name: impl Into<String>, permissions: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            name: name.into(),
            permissions: permissions.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Ties a role to the connection ids currently holding it.
#[derive(Debug, Clone)]
pub struct Binding {
    role: Role,
    subjects: HashSet<ClientId>,
}

impl Binding {
    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn subjects(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.subjects.iter().copied()
    }
}

/// Role bindings for one server. A missing authorizer is treated as
/// permissive by callers, which is the default when no roles are configured.
#[derive(Debug, Default)]
pub struct Authorizer {
    bindings: RwLock<Vec<Binding>>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every binding. Callers that report roles (the userlist)
    /// walk this rather than asking one subject at a time.
    pub fn bindings(&self) -> Vec<Binding> {
        self.bindings.read().clone()
    }

    /// Adds the subject to the binding for `role`, creating the binding if
    /// this is the first subject to hold the role.
    pub fn add_binding(&self, role: Role, subject: ClientId) {
        let mut bindings = self.bindings.write();

        if let Some(binding) = bindings.iter_mut().find(|b| b.role.name == role.name) {
            binding.subjects.insert(subject);
            return;
        }

        bindings.push(Binding {
            role,
            subjects: HashSet::from([subject]),
        });
    }

    /// Strips the subject from every binding. Called on disconnect.
    pub fn remove_subject(&self, subject: ClientId) {
        for binding in self.bindings.write().iter_mut() {
            binding.subjects.remove(&subject);
        }
    }

    /// Returns true when any binding whose role grants `permission` contains
    /// the subject.
    pub fn check(&self, subject: ClientId, permission: &str) -> bool {
        self.bindings
            .read()
            .iter()
            .any(|b| b.role.grants(permission) && b.subjects.contains(&subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles_held(authorizer: &Authorizer, subject: ClientId) -> Vec<String> {
        authorizer
            .bindings()
            .iter()
            .filter(|b| b.subjects().any(|s| s == subject))
            .map(|b| b.role().name().to_string())
            .collect()
    }

    #[test]
    fn checks_permissions_through_bindings() {
        let authorizer = Authorizer::new();
        let subject = ClientId::next();

        authorizer.add_binding(Role::new("dj", ["stream.control"]), subject);

        assert!(authorizer.check(subject, "stream.control"));
        assert!(!authorizer.check(subject, "queue.clear"), "ungranted permissions fail");
        assert!(!authorizer.check(ClientId::next(), "stream.control"), "unbound subjects fail");
    }

    #[test]
    fn bindings_enumerate_roles_and_subjects() {
        let authorizer = Authorizer::new();
        let (alice, bob) = (ClientId::next(), ClientId::next());

        authorizer.add_binding(Role::new("dj", ["stream.control"]), alice);
        authorizer.add_binding(Role::new("dj", ["stream.control"]), bob);
        authorizer.add_binding(Role::new("mod", ["queue.add"]), alice);

        let bindings = authorizer.bindings();
        assert_eq!(bindings.len(), 2, "one binding per role");

        let dj = bindings
            .iter()
            .find(|b| b.role().name() == "dj")
            .expect("the dj binding exists");
        assert_eq!(dj.subjects().count(), 2, "both subjects share the role");

        assert_eq!(roles_held(&authorizer, alice), vec!["dj", "mod"]);
    }

    #[test]
    fn disconnect_strips_every_binding() {
        let authorizer = Authorizer::new();
        let subject = ClientId::next();

        authorizer.add_binding(Role::new("dj", ["stream.control"]), subject);
        authorizer.add_binding(Role::new("mod", ["queue.add"]), subject);

        assert_eq!(roles_held(&authorizer, subject).len(), 2);

        authorizer.remove_subject(subject);

        assert!(roles_held(&authorizer, subject).is_empty(), "no roles remain after removal");
        assert!(!authorizer.check(subject, "stream.control"));
    }
}
