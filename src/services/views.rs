//! JSON views returned by the API
//!
//! Stored documents reference users, org units and work lines by id. Views
//! resolve those references so clients receive the fully loaded graph.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

use crate::auth::Role;
use crate::db::schemas::{
    AgreementDoc, DimensionDoc, IndicatorDoc, OrgUnitDoc, TaskDoc, UserDoc, WorkLineDoc,
};
use crate::store::Store;
use crate::types::Result;

/// Public user profile; never carries the password hash
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: i64,
    pub nombre: String,
    pub email: String,
    pub rol: Role,
    pub establecimiento_id: i64,
}

impl From<&UserDoc> for UserView {
    fn from(user: &UserDoc) -> Self {
        Self {
            id: user.id,
            nombre: user.name.clone(),
            email: user.email.clone(),
            rol: user.role,
            establecimiento_id: user.org_unit_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrgUnitView {
    pub id: i64,
    pub nombre: String,
}

impl From<&OrgUnitDoc> for OrgUnitView {
    fn from(org_unit: &OrgUnitDoc) -> Self {
        Self {
            id: org_unit.id,
            nombre: org_unit.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkLineView {
    pub id: i64,
    pub nombre: String,
    pub descripcion: String,
}

impl From<&WorkLineDoc> for WorkLineView {
    fn from(work_line: &WorkLineDoc) -> Self {
        Self {
            id: work_line.id,
            nombre: work_line.name.clone(),
            descripcion: work_line.description.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskView {
    pub id: i64,
    pub descripcion: String,
    pub plazo: Option<NaiveDate>,
    pub cumplimiento: Option<NaiveDate>,
    pub evidencias: Option<String>,
    pub obs: Option<String>,
}

impl From<&TaskDoc> for TaskView {
    fn from(task: &TaskDoc) -> Self {
        Self {
            id: task.id,
            descripcion: task.description.clone(),
            plazo: task.deadline,
            cumplimiento: task.completed_on,
            evidencias: task.evidence.clone(),
            obs: task.observation.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorView {
    pub id: i64,
    pub nombre: String,
    pub descripcion: String,
    pub meta: Option<f64>,
    pub evaluacion: Option<f64>,
    pub consideraciones: String,
    pub linea_trabajo: Option<WorkLineView>,
    pub tareas: Vec<TaskView>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DimensionView {
    pub id: i64,
    pub nombre: String,
    pub ponderacion: f64,
    pub responsables: Vec<UserView>,
    pub indicadores: Vec<IndicatorView>,
}

/// Agreement with its whole subtree loaded
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgreementView {
    pub id: i64,
    pub titulo: String,
    pub descripcion: String,
    pub fecha_inicio: NaiveDate,
    pub fecha_fin: NaiveDate,
    pub activo: bool,
    /// Absent when the creator was deleted
    pub creado_por: Option<UserView>,
    pub establecimiento: Option<OrgUnitView>,
    pub dimensiones: Vec<DimensionView>,
}

/// Agreement listing entry with only its org unit resolved
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgreementSummaryView {
    pub id: i64,
    pub titulo: String,
    pub descripcion: String,
    pub fecha_inicio: NaiveDate,
    pub fecha_fin: NaiveDate,
    pub activo: bool,
    pub establecimiento: Option<OrgUnitView>,
}

/// Lookup tables for the references of a batch of agreements
pub struct ViewContext {
    users: HashMap<i64, UserDoc>,
    org_units: HashMap<i64, OrgUnitDoc>,
    work_lines: HashMap<i64, WorkLineDoc>,
}

impl ViewContext {
    /// Load every user, org unit and work line referenced by `agreements`
    pub async fn load(store: &dyn Store, agreements: &[AgreementDoc]) -> Result<Self> {
        let mut user_ids: Vec<i64> = Vec::new();
        let mut org_unit_ids: Vec<i64> = Vec::new();
        let mut work_line_ids: Vec<i64> = Vec::new();

        for agreement in agreements {
            user_ids.push(agreement.creator_id);
            user_ids.extend(agreement.responsible_ids());
            org_unit_ids.push(agreement.org_unit_id);
            work_line_ids.extend(
                agreement
                    .dimensions
                    .iter()
                    .flat_map(|d| d.indicators.iter())
                    .filter_map(|i| i.work_line_id),
            );
        }

        for ids in [&mut user_ids, &mut org_unit_ids, &mut work_line_ids] {
            ids.sort_unstable();
            ids.dedup();
        }

        let users = store
            .find_users(&user_ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        let mut org_units = HashMap::new();
        for id in org_unit_ids {
            if let Some(org_unit) = store.find_org_unit(id).await? {
                org_units.insert(id, org_unit);
            }
        }

        let work_lines = store
            .find_work_lines(&work_line_ids)
            .await?
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        Ok(Self {
            users,
            org_units,
            work_lines,
        })
    }

    pub fn agreement(&self, agreement: &AgreementDoc) -> AgreementView {
        AgreementView {
            id: agreement.id,
            titulo: agreement.title.clone(),
            descripcion: agreement.description.clone(),
            fecha_inicio: agreement.start_date,
            fecha_fin: agreement.end_date,
            activo: agreement.active,
            creado_por: self.users.get(&agreement.creator_id).map(UserView::from),
            establecimiento: self.org_units.get(&agreement.org_unit_id).map(OrgUnitView::from),
            dimensiones: agreement.dimensions.iter().map(|d| self.dimension(d)).collect(),
        }
    }

    pub fn summary(&self, agreement: &AgreementDoc) -> AgreementSummaryView {
        AgreementSummaryView {
            id: agreement.id,
            titulo: agreement.title.clone(),
            descripcion: agreement.description.clone(),
            fecha_inicio: agreement.start_date,
            fecha_fin: agreement.end_date,
            activo: agreement.active,
            establecimiento: self.org_units.get(&agreement.org_unit_id).map(OrgUnitView::from),
        }
    }

    pub fn dimension(&self, dimension: &DimensionDoc) -> DimensionView {
        DimensionView {
            id: dimension.id,
            nombre: dimension.name.clone(),
            ponderacion: dimension.weight,
            // Deleted users drop out of the list
            responsables: dimension
                .responsible_ids
                .iter()
                .filter_map(|id| self.users.get(id))
                .map(UserView::from)
                .collect(),
            indicadores: dimension.indicators.iter().map(|i| self.indicator(i)).collect(),
        }
    }

    pub fn indicator(&self, indicator: &IndicatorDoc) -> IndicatorView {
        IndicatorView {
            id: indicator.id,
            nombre: indicator.name.clone(),
            descripcion: indicator.description.clone(),
            meta: indicator.target,
            evaluacion: indicator.evaluation,
            consideraciones: indicator.considerations.clone(),
            linea_trabajo: indicator
                .work_line_id
                .and_then(|id| self.work_lines.get(&id))
                .map(WorkLineView::from),
            tareas: indicator.tasks.iter().map(TaskView::from).collect(),
        }
    }
}
