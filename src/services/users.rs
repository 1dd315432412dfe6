//! User registration, profiles and credential checks

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::{authorize, hash_password, verify_password, Action, Actor, Resource, Role};
use crate::db::schemas::{Metadata, UserDoc};
use crate::services::views::UserView;
use crate::store::{Sequence, Store};
use crate::types::{ConvenioError, Result};

const MIN_PASSWORD_LEN: usize = 6;

/// Registration request body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserInput {
    pub nombre: String,
    pub email: String,
    pub password: String,
    /// Defaults to Director Establecimiento
    #[serde(default)]
    pub rol: Option<Role>,
    pub establecimiento_id: i64,
}

/// Profile update request body; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserInput {
    pub nombre: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub rol: Option<Role>,
    pub establecimiento_id: Option<i64>,
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register a user
    ///
    /// Registration is open, except that only an authenticated admin
    /// (`registrar`) may create another admin.
    pub async fn register(&self, registrar: Option<&Actor>, input: RegisterUserInput) -> Result<UserView> {
        if input.rol == Some(Role::Admin) && registrar.map(|a| a.role) != Some(Role::Admin) {
            warn!(email = %input.email, "Rejected admin self-registration");
            return Err(ConvenioError::Forbidden(
                "Only an admin can register admin users".into(),
            ));
        }

        let name = input.nombre.trim();
        if name.is_empty() {
            return Err(ConvenioError::BadRequest("nombre is required".into()));
        }
        let email = normalize_email(&input.email)?;
        check_password(&input.password)?;
        self.require_org_unit(input.establecimiento_id).await?;

        let user = UserDoc {
            id: self.store.next_id(Sequence::Users).await?,
            metadata: Metadata::new(),
            name: name.to_string(),
            email,
            password_hash: hash_password(&input.password)?,
            role: input.rol.unwrap_or_default(),
            org_unit_id: input.establecimiento_id,
        };
        self.store.insert_user(user.clone()).await?;

        info!(user_id = user.id, role = %user.role, org_unit_id = user.org_unit_id, "Registered user");
        Ok(UserView::from(&user))
    }

    pub async fn list(&self) -> Result<Vec<UserView>> {
        Ok(self.store.list_users().await?.iter().map(UserView::from).collect())
    }

    pub async fn get(&self, id: i64) -> Result<UserView> {
        Ok(UserView::from(&self.find(id).await?))
    }

    /// Users with the Gestion Establecimiento role in an org unit
    pub async fn management_users(&self, org_unit_id: i64) -> Result<Vec<UserView>> {
        Ok(self
            .store
            .list_users_in_org_unit(org_unit_id, Some(Role::GestionEstablecimiento))
            .await?
            .iter()
            .map(UserView::from)
            .collect())
    }

    pub async fn update(&self, actor: &Actor, id: i64, input: UpdateUserInput) -> Result<UserView> {
        authorize(actor, Resource::User(id), Action::UpdateUser)?;

        let mut user = self.find(id).await?;

        if (input.rol.is_some() || input.establecimiento_id.is_some()) && actor.role != Role::Admin {
            return Err(ConvenioError::Forbidden(
                "Only an admin can change role or org unit".into(),
            ));
        }

        if let Some(name) = input.nombre {
            let name = name.trim();
            if name.is_empty() {
                return Err(ConvenioError::BadRequest("nombre cannot be empty".into()));
            }
            user.name = name.to_string();
        }
        if let Some(email) = input.email {
            user.email = normalize_email(&email)?;
        }
        if let Some(password) = input.password {
            check_password(&password)?;
            user.password_hash = hash_password(&password)?;
        }
        if let Some(role) = input.rol {
            user.role = role;
        }
        if let Some(org_unit_id) = input.establecimiento_id {
            self.require_org_unit(org_unit_id).await?;
            user.org_unit_id = org_unit_id;
        }

        if !self.store.replace_user(user.clone()).await? {
            return Err(ConvenioError::NotFound(format!("User {id} not found")));
        }

        info!(user_id = id, actor_id = actor.user_id, "Updated user");
        Ok(UserView::from(&user))
    }

    pub async fn delete(&self, actor: &Actor, id: i64) -> Result<()> {
        authorize(actor, Resource::User(id), Action::DeleteUser)?;

        if !self.store.delete_user(id).await? {
            return Err(ConvenioError::NotFound(format!("User {id} not found")));
        }

        info!(user_id = id, actor_id = actor.user_id, "Deleted user");
        Ok(())
    }

    /// Give the admin role to the user with `email`
    ///
    /// Used once at startup to seed the first admin. Returns None when no
    /// user has that email.
    pub async fn promote_to_admin(&self, email: &str) -> Result<Option<UserView>> {
        let email = email.trim().to_lowercase();
        let Some(mut user) = self.store.find_user_by_email(&email).await? else {
            return Ok(None);
        };

        if user.role != Role::Admin {
            user.role = Role::Admin;
            if !self.store.replace_user(user.clone()).await? {
                return Ok(None);
            }
            info!(user_id = user.id, "Granted admin role");
        }
        Ok(Some(UserView::from(&user)))
    }

    /// Check login credentials
    ///
    /// Unknown emails and wrong passwords fail the same way.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<UserDoc> {
        let email = email.trim().to_lowercase();
        let invalid = || ConvenioError::Unauthorized("Invalid credentials".into());

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            warn!(email = %email, "Login failed: unknown email");
            return Err(invalid());
        };

        if !verify_password(password, &user.password_hash)? {
            warn!(user_id = user.id, "Login failed: wrong password");
            return Err(invalid());
        }

        Ok(user)
    }

    /// Resolve the acting user for a token subject
    ///
    /// Role and org unit come from the store, not from the token, so changes
    /// take effect without a new login.
    pub async fn actor(&self, user_id: i64) -> Result<Actor> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ConvenioError::Unauthorized("User no longer exists".into()))?;

        Ok(Actor {
            user_id: user.id,
            email: user.email,
            role: user.role,
            org_unit_id: user.org_unit_id,
        })
    }

    async fn find(&self, id: i64) -> Result<UserDoc> {
        self.store
            .find_user(id)
            .await?
            .ok_or_else(|| ConvenioError::NotFound(format!("User {id} not found")))
    }

    async fn require_org_unit(&self, org_unit_id: i64) -> Result<()> {
        match self.store.find_org_unit(org_unit_id).await? {
            Some(_) => Ok(()),
            None => Err(ConvenioError::BadRequest(format!(
                "Org unit {org_unit_id} does not exist"
            ))),
        }
    }
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };

    if valid && !email.contains(char::is_whitespace) {
        Ok(email)
    } else {
        Err(ConvenioError::BadRequest(format!("Invalid email: {email}")))
    }
}

fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ConvenioError::BadRequest(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
