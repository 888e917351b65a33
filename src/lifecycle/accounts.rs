use tracing::{info, warn};

use super::{authorize, required_text, DomainError, DomainResult};
use crate::access::{Action, Role, Scope, Subject};
use crate::auth::password::{hash_password, verify_against_dummy, verify_password};
use crate::models::{NewUser, User};
use crate::notify::{NotificationEvent, Notifier};
use crate::store::{Store, StoreError};

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<Role>,
}

fn validated(registration: Registration, role: Role) -> DomainResult<NewUser> {
    let email = required_text(&registration.email, "email")?.to_lowercase();
    if !email.contains('@') {
        return Err(DomainError::invalid("a valid email address is required"));
    }
    if registration.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(DomainError::invalid(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let password_hash = hash_password(&registration.password).map_err(DomainError::Internal)?;
    Ok(NewUser {
        email,
        password_hash,
        first_name: required_text(&registration.first_name, "first_name")?,
        last_name: required_text(&registration.last_name, "last_name")?,
        role,
    })
}

async fn insert(store: &dyn Store, user: NewUser) -> DomainResult<User> {
    match store.insert_user(user).await {
        Ok(user) => Ok(user),
        Err(StoreError::Conflict(_)) => Err(DomainError::Conflict(
            "an account with this email already exists".to_string(),
        )),
        Err(err) => Err(err.into()),
    }
}

/// Public and admin registration share this path. Anyone but an admin gets a
/// client account whatever role was asked for.
pub async fn register(
    store: &dyn Store,
    notifier: &Notifier,
    caller: Option<&Subject>,
    registration: Registration,
) -> DomainResult<User> {
    let role = match (caller, registration.role) {
        (Some(admin), Some(role)) if admin.role == Role::Admin => {
            authorize(admin, Action::ProvisionUser, &Scope::new())?;
            role
        }
        (_, Some(role)) if role != Role::Client => {
            warn!(requested = %role, "ignoring role on public registration");
            Role::Client
        }
        _ => Role::Client,
    };

    let user = insert(store, validated(registration, role)?).await?;
    info!(user_id = %user.id, role = %user.role, "user registered");
    notifier.dispatch(NotificationEvent::UserRegistered {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role,
    });
    Ok(user)
}

/// Creates an account with any role, bypassing the session check. Used by the
/// `provision` binary.
pub async fn provision(store: &dyn Store, registration: Registration) -> DomainResult<User> {
    let role = registration.role.unwrap_or(Role::Client);
    let user = insert(store, validated(registration, role)?).await?;
    info!(user_id = %user.id, role = %user.role, "user provisioned");
    Ok(user)
}

pub async fn authenticate(store: &dyn Store, email: &str, password: &str) -> DomainResult<User> {
    let email = email.trim().to_lowercase();
    let Some(user) = store.find_user_by_email(&email).await? else {
        verify_against_dummy(password);
        return Err(DomainError::Unauthenticated);
    };

    match verify_password(password, &user.password_hash) {
        Ok(true) => Ok(user),
        Ok(false) => Err(DomainError::Unauthenticated),
        Err(err) => {
            warn!(user_id = %user.id, error = %err, "stored password hash is unreadable");
            Err(DomainError::Unauthenticated)
        }
    }
}

pub async fn list_users(store: &dyn Store, subject: &Subject) -> DomainResult<Vec<User>> {
    authorize(subject, Action::ListUsers, &Scope::new())?;
    Ok(store.list_users().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn registration(email: &str, role: Option<Role>) -> Registration {
        Registration {
            email: email.to_string(),
            password: "long enough".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            role,
        }
    }

    #[tokio::test]
    async fn public_registration_always_creates_clients() {
        let store = MemoryStore::new();
        let (notifier, mut events) = Notifier::channel();

        let user = register(&store, &notifier, None, registration("A@Example.com", Some(Role::Admin)))
            .await
            .unwrap();
        assert_eq!(user.role, Role::Client);
        assert_eq!(user.email, "a@example.com");
        assert!(matches!(
            events.try_recv().unwrap(),
            NotificationEvent::UserRegistered { role: Role::Client, .. }
        ));

        let employee = Subject {
            user_id: Uuid::new_v4(),
            role: Role::Employee,
        };
        let user = register(
            &store,
            &notifier,
            Some(&employee),
            registration("b@example.com", Some(Role::Worker)),
        )
        .await
        .unwrap();
        assert_eq!(user.role, Role::Client);
    }

    #[tokio::test]
    async fn admins_choose_the_role() {
        let store = MemoryStore::new();
        let (notifier, _events) = Notifier::channel();
        let admin = Subject {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let user = register(
            &store,
            &notifier,
            Some(&admin),
            registration("w@example.com", Some(Role::Worker)),
        )
        .await
        .unwrap();
        assert_eq!(user.role, Role::Worker);
    }

    #[tokio::test]
    async fn duplicate_emails_conflict_and_short_passwords_fail() {
        let store = MemoryStore::new();
        let (notifier, _events) = Notifier::channel();
        register(&store, &notifier, None, registration("c@example.com", None))
            .await
            .unwrap();
        assert!(matches!(
            register(&store, &notifier, None, registration("C@example.com", None)).await,
            Err(DomainError::Conflict(_))
        ));

        let mut short = registration("d@example.com", None);
        short.password = "short".to_string();
        assert!(matches!(
            register(&store, &notifier, None, short).await,
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn authentication_checks_the_password() {
        let store = MemoryStore::new();
        provision(&store, registration("e@example.com", Some(Role::Admin)))
            .await
            .unwrap();

        let user = authenticate(&store, " E@example.com", "long enough").await.unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(matches!(
            authenticate(&store, "e@example.com", "wrong password").await,
            Err(DomainError::Unauthenticated)
        ));
        assert!(matches!(
            authenticate(&store, "nobody@example.com", "long enough").await,
            Err(DomainError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn only_admins_list_users() {
        let store = MemoryStore::new();
        let client = Subject {
            user_id: Uuid::new_v4(),
            role: Role::Client,
        };
        assert!(matches!(
            list_users(&store, &client).await,
            Err(DomainError::Forbidden)
        ));
    }
}
