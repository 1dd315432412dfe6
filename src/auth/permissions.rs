//! Roles and the single policy function guarding every aggregate mutation
//!
//! Every protected operation calls [`authorize`] with the acting user, the
//! resource being touched and the action attempted. Rules live here and
//! nowhere else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::schemas::{AgreementDoc, DimensionDoc};
use crate::types::ConvenioError;

/// User roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Role {
    /// Creates agreements for their org unit
    #[default]
    #[serde(rename = "Director Establecimiento", alias = "director")]
    DirectorEstablecimiento,
    /// Manages dimensions they are responsible for
    #[serde(rename = "Gestion Establecimiento")]
    GestionEstablecimiento,
    /// Reviews every agreement and finalizes them
    #[serde(rename = "Revisor")]
    Revisor,
    #[serde(rename = "sostenedor")]
    Sostenedor,
    #[serde(rename = "admin")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::DirectorEstablecimiento => "Director Establecimiento",
            Role::GestionEstablecimiento => "Gestion Establecimiento",
            Role::Revisor => "Revisor",
            Role::Sostenedor => "sostenedor",
            Role::Admin => "admin",
        }
    }

    /// Roles allowed to contribute indicators and tasks to any dimension
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Revisor | Role::GestionEstablecimiento)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ConvenioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Director Establecimiento" | "director" => Ok(Role::DirectorEstablecimiento),
            "Gestion Establecimiento" => Ok(Role::GestionEstablecimiento),
            "Revisor" => Ok(Role::Revisor),
            "sostenedor" => Ok(Role::Sostenedor),
            "admin" => Ok(Role::Admin),
            other => Err(ConvenioError::BadRequest(format!("Unknown role: {other}"))),
        }
    }
}

/// The authenticated user performing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
    pub org_unit_id: i64,
}

/// Operations subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateAgreement,
    /// Update an agreement or add a dimension to it
    EditAgreement,
    EditDimension,
    /// Change who is responsible for a dimension
    AssignResponsibles,
    /// Add or update indicators and tasks under a dimension
    ContributeToDimension,
    FinalizeAgreement,
    ListOwnAgreements,
    ListAssignedAgreements,
    UpdateUser,
    DeleteUser,
}

/// What an action is applied to
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    /// Actions that only depend on the actor's role
    Global,
    Agreement(&'a AgreementDoc),
    Dimension {
        agreement: &'a AgreementDoc,
        dimension: &'a DimensionDoc,
    },
    User(i64),
}

/// Decide whether `actor` may perform `action` on `resource`
pub fn authorize(actor: &Actor, resource: Resource<'_>, action: Action) -> Result<(), ConvenioError> {
    let allowed = match (action, resource) {
        (Action::CreateAgreement, _) | (Action::ListOwnAgreements, _) => {
            actor.role == Role::DirectorEstablecimiento
        }

        (Action::EditAgreement, Resource::Agreement(agreement)) => {
            agreement.creator_id == actor.user_id
                || (actor.role == Role::GestionEstablecimiento
                    && agreement.has_responsible(actor.user_id))
        }

        (Action::AssignResponsibles, Resource::Agreement(agreement))
        | (Action::AssignResponsibles, Resource::Dimension { agreement, .. }) => {
            agreement.creator_id == actor.user_id
        }

        (Action::EditDimension, Resource::Dimension { agreement, dimension }) => {
            agreement.creator_id == actor.user_id || dimension.is_responsible(actor.user_id)
        }

        (Action::ContributeToDimension, Resource::Dimension { agreement, dimension }) => {
            agreement.creator_id == actor.user_id
                || dimension.is_responsible(actor.user_id)
                || actor.role.is_elevated()
        }

        (Action::FinalizeAgreement, _) => actor.role == Role::Revisor,

        (Action::ListAssignedAgreements, _) => matches!(
            actor.role,
            Role::Revisor | Role::GestionEstablecimiento | Role::DirectorEstablecimiento
        ),

        (Action::UpdateUser, Resource::User(target_id)) => {
            target_id == actor.user_id || actor.role == Role::Admin
        }

        (Action::DeleteUser, _) => actor.role == Role::Admin,

        // Resource does not fit the action
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(ConvenioError::Forbidden(denial_message(action).to_string()))
    }
}

fn denial_message(action: Action) -> &'static str {
    match action {
        Action::CreateAgreement => "Only a Director can create agreements",
        Action::EditAgreement => "You are not allowed to edit this agreement",
        Action::EditDimension => "You are not allowed to edit this dimension",
        Action::AssignResponsibles => "Only the agreement creator can assign responsibles",
        Action::ContributeToDimension => {
            "You are not allowed to add or edit indicators and tasks in this dimension"
        }
        Action::FinalizeAgreement => "Only a Revisor can finalize agreements",
        Action::ListOwnAgreements => "Only a Director can list their agreements",
        Action::ListAssignedAgreements => "Your role cannot list assigned agreements",
        Action::UpdateUser => "You can only update your own profile",
        Action::DeleteUser => "Admin role required",
    }
}
