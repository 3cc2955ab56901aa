use crate::model::Id;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Write,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Task,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub action: Action,
    pub resource: Resource,
}

impl Permission {
    pub const CREATE_TASK: Permission = Permission {
        action: Action::Create,
        resource: Resource::Task,
    };
}

/// Permissions granted to the caller of a request.
#[derive(Debug, Clone, Default)]
pub struct Authorization {
    pub user: Id,
    pub permissions: Vec<Permission>,
}

impl Authorization {
    pub fn allowed(&self, perm: Permission) -> bool {
        self.permissions.contains(&perm)
    }
}

/// Checks the caller's permissions before task creation reaches the store.
pub struct Validator<S> {
    store: S,
}

impl<S: Store> Validator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn create_task(
        &self,
        auth: Option<&Authorization>,
        org: Id,
        user: Id,
        script: &str,
    ) -> Result<Id, StoreError> {
        check_permission(auth, Permission::CREATE_TASK)?;
        self.store.create_task(org, user, script).await
    }
}

fn check_permission(auth: Option<&Authorization>, perm: Permission) -> Result<(), StoreError> {
    let auth = auth.ok_or(StoreError::MissingAuthorization)?;
    if !auth.allowed(perm) {
        return Err(StoreError::Unauthorized);
    }
    Ok(())
}
