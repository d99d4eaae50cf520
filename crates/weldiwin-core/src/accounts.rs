use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use weldiwin_db::models::{NewUser, UserPatch, UserRow};
use weldiwin_types::access;
use weldiwin_types::models::{Actor, Role, User, VerificationChannel};
use weldiwin_types::{ServiceError, ServiceResult};

use crate::store::Store;

/// Identity store for parent and admin accounts.
#[derive(Clone)]
pub struct Accounts {
    store: Store,
}

impl Accounts {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    // -- Identity store contract --

    pub async fn find_by_id(&self, id: Uuid) -> ServiceResult<Option<UserRow>> {
        self.store.read("find user", move |db| db.get_user(id)).await
    }

    /// Email wins when both are given.
    pub async fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> ServiceResult<Option<UserRow>> {
        match (email, phone) {
            (Some(email), _) => {
                let email = email.trim().to_lowercase();
                self.store
                    .read("find user by email", move |db| db.find_user_by_email(&email))
                    .await
            }
            (None, Some(phone)) => {
                let phone = phone.trim().to_string();
                self.store
                    .read("find user by phone", move |db| db.find_user_by_phone(&phone))
                    .await
            }
            (None, None) => Err(ServiceError::invalid("email or phone is required")),
        }
    }

    pub async fn find_by_google_id(&self, google_id: &str) -> ServiceResult<Option<UserRow>> {
        let google_id = google_id.to_string();
        self.store
            .read("find user by google id", move |db| db.find_user_by_google_id(&google_id))
            .await
    }

    pub async fn create_account(&self, mut user: NewUser) -> ServiceResult<User> {
        user.email = user.email.trim().to_lowercase();
        let id = user.id;
        let email = user.email.clone();

        self.store
            .write("create user", move |db| db.insert_user(&user, Utc::now()))
            .await
            .map_err(|e| match e {
                ServiceError::Conflict(_) => ServiceError::conflict("Email already exists"),
                other => other,
            })?;

        info!("Account created: {} ({})", email, id);
        self.require(id).await.map(|row| row.to_user())
    }

    pub async fn update_account(&self, id: Uuid, mut patch: UserPatch) -> ServiceResult<User> {
        if let Some(email) = patch.email.as_mut() {
            *email = email.trim().to_lowercase();
        }
        let found = self
            .store
            .write("update user", move |db| db.update_user(id, &patch))
            .await
            .map_err(|e| match e {
                ServiceError::Conflict(_) => ServiceError::conflict("Email already exists"),
                other => other,
            })?;
        if !found {
            return Err(ServiceError::not_found("User not found"));
        }
        self.require(id).await.map(|row| row.to_user())
    }

    pub async fn require(&self, id: Uuid) -> ServiceResult<UserRow> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("User not found"))
    }

    // -- Code flows --

    pub async fn store_verification_code(
        &self,
        id: Uuid,
        code: String,
        expires_at: DateTime<Utc>,
        channel: VerificationChannel,
    ) -> ServiceResult<()> {
        self.store
            .write("store verification code", move |db| {
                db.set_verification_code(id, &code, expires_at, channel, Utc::now())
            })
            .await
    }

    pub async fn mark_verified(&self, id: Uuid) -> ServiceResult<()> {
        self.store.write("verify user", move |db| db.mark_verified(id)).await
    }

    pub async fn store_reset_code(
        &self,
        id: Uuid,
        code: String,
        expires_at: DateTime<Utc>,
    ) -> ServiceResult<()> {
        self.store
            .write("store reset code", move |db| {
                db.set_reset_code(id, &code, expires_at, Utc::now())
            })
            .await
    }

    pub async fn reset_password(&self, id: Uuid, password_hash: String) -> ServiceResult<()> {
        self.store
            .write("reset password", move |db| db.reset_password(id, &password_hash))
            .await
    }

    pub async fn link_google_id(&self, id: Uuid, google_id: String) -> ServiceResult<()> {
        self.store
            .write("link google account", move |db| db.link_google_id(id, &google_id))
            .await
    }

    // -- Actor-facing user management --

    pub async fn create_user(&self, actor: &Actor, user: NewUser) -> ServiceResult<User> {
        access::create_user(actor)?;
        self.create_account(user).await
    }

    /// Admins see everyone, a parent sees only itself.
    pub async fn list_users(&self, actor: &Actor) -> ServiceResult<Vec<User>> {
        if actor.is_admin() {
            let rows = self.store.read("list users", |db| db.list_users()).await?;
            return Ok(rows.iter().map(UserRow::to_user).collect());
        }
        access::read_user(actor, actor.id)?;
        Ok(vec![self.require(actor.id).await?.to_user()])
    }

    pub async fn get_user(&self, actor: &Actor, id: Uuid) -> ServiceResult<User> {
        access::read_user(actor, id)?;
        Ok(self.require(id).await?.to_user())
    }

    pub async fn update_user(
        &self,
        actor: &Actor,
        id: Uuid,
        patch: UserPatch,
    ) -> ServiceResult<User> {
        access::update_user(actor, id)?;
        let current = self.require(id).await?;
        if !actor.is_admin() {
            if let Some(role) = patch.role {
                if role != current.role {
                    return Err(ServiceError::forbidden("you cannot change your own role"));
                }
            }
            if patch.status.is_some() || patch.is_verified.is_some() {
                return Err(ServiceError::forbidden(
                    "only an admin can change account status or verification",
                ));
            }
        }
        self.update_account(id, patch).await
    }

    pub async fn delete_user(&self, actor: &Actor, id: Uuid) -> ServiceResult<()> {
        access::delete_user(actor, id)?;
        let removed = self
            .store
            .write("delete user", move |db| db.delete_user(id))
            .await
            .map_err(|e| match e {
                ServiceError::Conflict(_) => ServiceError::conflict(
                    "User still owns children or rooms; delete or reassign them first",
                ),
                other => other,
            })?;
        if !removed {
            return Err(ServiceError::not_found("User not found"));
        }
        info!("User {} deleted by {}", id, actor.id);
        Ok(())
    }

    /// Loads a user that is expected to hold the PARENT role.
    pub async fn require_parent(&self, id: Uuid) -> ServiceResult<UserRow> {
        let row = self.require(id).await?;
        if row.role != Role::Parent {
            return Err(ServiceError::invalid("target user is not a parent"));
        }
        Ok(row)
    }
}
