//! Agreement aggregate: agreements, dimensions, indicators and tasks
//!
//! Every operation loads the owning agreement, checks the acting user with
//! [`authorize`], edits the embedded subtree in memory and writes the whole
//! agreement back in one replace. A failed validation therefore never leaves
//! a half-built subtree behind. Replaces only land on the version that was
//! read; a writer that lost the race reapplies its edit to the fresh copy.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::{authorize, Action, Actor, Resource, Role};
use crate::db::schemas::{AgreementDoc, DimensionDoc, IndicatorDoc, Metadata, TaskDoc};
use crate::services::dates::{double_option, parse_date, parse_optional_date};
use crate::services::evidence::{EvidenceStore, EvidenceUpload};
use crate::services::views::{
    AgreementSummaryView, AgreementView, DimensionView, IndicatorView, TaskView, ViewContext,
};
use crate::services::work_lines;
use crate::store::{Sequence, Store};
use crate::types::{ConvenioError, Result};

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgreementInput {
    pub titulo: String,
    #[serde(default)]
    pub descripcion: String,
    pub fecha_inicio: String,
    pub fecha_fin: String,
    #[serde(default)]
    pub activo: Option<bool>,
    #[serde(default)]
    pub dimensiones: Vec<DimensionInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionInput {
    pub nombre: String,
    pub ponderacion: Option<f64>,
    /// Single responsible, accepted alongside `responsableIds`
    #[serde(default)]
    pub responsable_id: Option<i64>,
    #[serde(default)]
    pub responsable_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub indicadores: Vec<IndicatorInput>,
}

impl DimensionInput {
    /// Requested responsibles, or None when the body names none
    fn responsibles(&self) -> Option<Vec<i64>> {
        merge_responsibles(self.responsable_id, self.responsable_ids.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorInput {
    pub nombre: String,
    #[serde(default)]
    pub descripcion: String,
    #[serde(default)]
    pub meta: Option<f64>,
    #[serde(default)]
    pub evaluacion: Option<f64>,
    #[serde(default)]
    pub consideraciones: String,
    /// Work line name, created on first use
    #[serde(default)]
    pub linea_trabajo: Option<String>,
    #[serde(default)]
    pub tareas: Vec<TaskInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskInput {
    pub descripcion: String,
    #[serde(default)]
    pub plazo: Option<String>,
    #[serde(default)]
    pub cumplimiento: Option<String>,
    #[serde(default)]
    pub obs: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgreementInput {
    pub titulo: Option<String>,
    pub descripcion: Option<String>,
    pub fecha_inicio: Option<String>,
    pub fecha_fin: Option<String>,
    /// Replaces the whole dimension subtree when present
    pub dimensiones: Option<Vec<DimensionInput>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDimensionInput {
    pub nombre: Option<String>,
    pub ponderacion: Option<f64>,
    #[serde(default)]
    pub responsable_id: Option<i64>,
    #[serde(default)]
    pub responsable_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIndicatorInput {
    pub nombre: Option<String>,
    pub descripcion: Option<String>,
    pub meta: Option<f64>,
    pub evaluacion: Option<f64>,
    pub consideraciones: Option<String>,
    pub linea_trabajo: Option<String>,
}

/// Partial task update; `null` or `""` clears dates and text fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskInput {
    pub descripcion: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub plazo: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub cumplimiento: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub evidencias: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub obs: Option<Option<String>>,
}

/// One entry of a bulk responsible reassignment
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub dimension_id: i64,
    #[serde(default)]
    pub responsable_ids: Vec<i64>,
}

/// Where a subtree comes from; imports are more lenient than the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Api,
    Import,
}

// =============================================================================
// Service
// =============================================================================

/// Write attempts on a contended agreement before answering `Conflict`
const MAX_WRITE_ATTEMPTS: u32 = 16;

#[derive(Clone)]
pub struct AgreementService {
    store: Arc<dyn Store>,
    evidence: EvidenceStore,
}

impl AgreementService {
    pub fn new(store: Arc<dyn Store>, evidence: EvidenceStore) -> Self {
        Self { store, evidence }
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    /// Create an agreement, with an optional nested subtree
    pub async fn create(&self, actor: &Actor, input: CreateAgreementInput) -> Result<AgreementView> {
        authorize(actor, Resource::Global, Action::CreateAgreement)?;

        let agreement = self
            .build_agreement(actor.user_id, actor.org_unit_id, input, Origin::Api)
            .await?;
        self.store.insert_agreement(agreement.clone()).await?;

        info!(
            agreement_id = agreement.id,
            actor_id = actor.user_id,
            dimensions = agreement.dimensions.len(),
            "Created agreement"
        );
        self.view(&agreement).await
    }

    /// Create an agreement read from a workbook
    ///
    /// The creator is the user named by `creator_email`, or the importing
    /// user when the workbook names nobody.
    pub(crate) async fn create_imported(
        &self,
        actor: &Actor,
        creator_email: Option<&str>,
        input: CreateAgreementInput,
    ) -> Result<AgreementDoc> {
        let (creator_id, org_unit_id) = match creator_email {
            Some(email) => {
                let email = email.trim().to_lowercase();
                let creator = self
                    .store
                    .find_user_by_email(&email)
                    .await?
                    .ok_or_else(|| ConvenioError::Import(format!("No user found with email {email}")))?;
                (creator.id, creator.org_unit_id)
            }
            None => (actor.user_id, actor.org_unit_id),
        };

        let agreement = self
            .build_agreement(creator_id, org_unit_id, input, Origin::Import)
            .await?;
        self.store.insert_agreement(agreement.clone()).await?;

        info!(
            agreement_id = agreement.id,
            creator_id,
            actor_id = actor.user_id,
            dimensions = agreement.dimensions.len(),
            "Imported agreement"
        );
        Ok(agreement)
    }

    pub async fn get(&self, id: i64) -> Result<AgreementView> {
        let agreement = self.load(id).await?;
        self.view(&agreement).await
    }

    pub async fn list(&self) -> Result<Vec<AgreementSummaryView>> {
        let agreements = self.store.list_agreements().await?;
        let ctx = ViewContext::load(self.store.as_ref(), &agreements).await?;
        Ok(agreements.iter().map(|a| ctx.summary(a)).collect())
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: i64,
        input: UpdateAgreementInput,
    ) -> Result<AgreementView> {
        let UpdateAgreementInput {
            titulo,
            descripcion,
            fecha_inicio,
            fecha_fin,
            dimensiones,
        } = input;

        let agreement = self.load(id).await?;
        authorize(actor, Resource::Agreement(&agreement), Action::EditAgreement)?;

        let title = titulo.as_deref().map(|t| required_text("titulo", t)).transpose()?;
        let start = fecha_inicio
            .as_deref()
            .map(|d| parse_date("fechaInicio", d))
            .transpose()?;
        let end = fecha_fin.as_deref().map(|d| parse_date("fechaFin", d)).transpose()?;

        let assigns = dimensiones.as_ref().is_some_and(|dimensions| {
            dimensions
                .iter()
                .any(|d| d.responsibles().is_some_and(|r| !r.is_empty()))
        });
        if assigns {
            authorize(actor, Resource::Agreement(&agreement), Action::AssignResponsibles)?;
        }

        let rebuilt = match dimensiones {
            Some(dimensions) => {
                let mut rebuilt = Vec::with_capacity(dimensions.len());
                for dimension in dimensions {
                    rebuilt.push(
                        self.build_dimension(dimension, agreement.org_unit_id, Origin::Api)
                            .await?,
                    );
                }
                Some(rebuilt)
            }
            None => None,
        };

        let (agreement, dropped) = self
            .commit(agreement, |agreement| {
                authorize(actor, Resource::Agreement(agreement), Action::EditAgreement)?;
                if assigns {
                    authorize(actor, Resource::Agreement(agreement), Action::AssignResponsibles)?;
                }

                if let Some(title) = &title {
                    agreement.title = title.clone();
                }
                if let Some(description) = &descripcion {
                    agreement.description = description.clone();
                }
                if let Some(start) = start {
                    agreement.start_date = start;
                }
                if let Some(end) = end {
                    agreement.end_date = end;
                }
                check_period(agreement)?;

                Ok(rebuilt
                    .as_ref()
                    .map(|dimensions| std::mem::replace(&mut agreement.dimensions, dimensions.clone()).len()))
            })
            .await?;

        if let Some(dropped) = dropped {
            info!(
                agreement_id = id,
                dropped,
                added = agreement.dimensions.len(),
                "Replaced dimension subtree"
            );
        }
        info!(agreement_id = id, actor_id = actor.user_id, "Updated agreement");
        self.view(&agreement).await
    }

    pub async fn add_dimension(
        &self,
        actor: &Actor,
        agreement_id: i64,
        input: DimensionInput,
    ) -> Result<DimensionView> {
        let agreement = self.load(agreement_id).await?;
        authorize(actor, Resource::Agreement(&agreement), Action::EditAgreement)?;
        let assigns = input.responsibles().is_some_and(|r| !r.is_empty());
        if assigns {
            authorize(actor, Resource::Agreement(&agreement), Action::AssignResponsibles)?;
        }

        let dimension = self
            .build_dimension(input, agreement.org_unit_id, Origin::Api)
            .await?;

        let (agreement, ()) = self
            .commit(agreement, |agreement| {
                authorize(actor, Resource::Agreement(agreement), Action::EditAgreement)?;
                if assigns {
                    authorize(actor, Resource::Agreement(agreement), Action::AssignResponsibles)?;
                }
                agreement.dimensions.push(dimension.clone());
                Ok(())
            })
            .await?;

        info!(agreement_id, dimension_id = dimension.id, actor_id = actor.user_id, "Added dimension");
        let ctx = ViewContext::load(self.store.as_ref(), std::slice::from_ref(&agreement)).await?;
        Ok(ctx.dimension(&dimension))
    }

    pub async fn update_dimension(
        &self,
        actor: &Actor,
        dimension_id: i64,
        input: UpdateDimensionInput,
    ) -> Result<DimensionView> {
        let agreement = self.load_by_dimension(dimension_id).await?;
        let idx = locate_dimension(&agreement, dimension_id)?;
        authorize_dimension(actor, &agreement, idx, Action::EditDimension)?;

        let responsibles = match merge_responsibles(input.responsable_id, input.responsable_ids.as_deref()) {
            Some(ids) => {
                authorize(actor, Resource::Agreement(&agreement), Action::AssignResponsibles)?;
                Some(self.validate_responsibles(&ids, agreement.org_unit_id).await?)
            }
            None => None,
        };
        let name = input
            .nombre
            .as_deref()
            .map(|n| required_text("nombre", n))
            .transpose()?;
        let weight = input.ponderacion.map(check_weight).transpose()?;

        let (agreement, dimension) = self
            .commit(agreement, |agreement| {
                let idx = locate_dimension(agreement, dimension_id)?;
                authorize_dimension(actor, agreement, idx, Action::EditDimension)?;
                if responsibles.is_some() {
                    authorize(actor, Resource::Agreement(agreement), Action::AssignResponsibles)?;
                }

                let dimension = &mut agreement.dimensions[idx];
                if let Some(name) = &name {
                    dimension.name = name.clone();
                }
                if let Some(weight) = weight {
                    dimension.weight = weight;
                }
                if let Some(ids) = &responsibles {
                    dimension.responsible_ids = ids.clone();
                }
                Ok(dimension.clone())
            })
            .await?;

        info!(dimension_id, actor_id = actor.user_id, "Updated dimension");
        let ctx = ViewContext::load(self.store.as_ref(), std::slice::from_ref(&agreement)).await?;
        Ok(ctx.dimension(&dimension))
    }

    /// Replace the responsibles of several dimensions at once
    pub async fn reassign_responsibles(
        &self,
        actor: &Actor,
        agreement_id: i64,
        assignments: Vec<Assignment>,
    ) -> Result<AgreementView> {
        let agreement = self.load(agreement_id).await?;
        authorize(actor, Resource::Agreement(&agreement), Action::AssignResponsibles)?;

        // Validate everything before touching the agreement
        let mut resolved = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            if agreement.dimension_index(assignment.dimension_id).is_none() {
                return Err(foreign_dimension(assignment.dimension_id, agreement_id));
            }
            let ids = self
                .validate_responsibles(&assignment.responsable_ids, agreement.org_unit_id)
                .await?;
            resolved.push((assignment.dimension_id, ids));
        }

        let (agreement, ()) = self
            .commit(agreement, |agreement| {
                authorize(actor, Resource::Agreement(agreement), Action::AssignResponsibles)?;
                for (dimension_id, ids) in &resolved {
                    let idx = agreement
                        .dimension_index(*dimension_id)
                        .ok_or_else(|| foreign_dimension(*dimension_id, agreement_id))?;
                    agreement.dimensions[idx].responsible_ids = ids.clone();
                }
                Ok(())
            })
            .await?;

        info!(
            agreement_id,
            assignments = assignments.len(),
            actor_id = actor.user_id,
            "Reassigned dimension responsibles"
        );
        self.view(&agreement).await
    }

    pub async fn add_indicator(
        &self,
        actor: &Actor,
        dimension_id: i64,
        input: IndicatorInput,
    ) -> Result<IndicatorView> {
        let agreement = self.load_by_dimension(dimension_id).await?;
        let idx = locate_dimension(&agreement, dimension_id)?;
        authorize_dimension(actor, &agreement, idx, Action::ContributeToDimension)?;

        let indicator = self.build_indicator(input, Origin::Api).await?;

        let (agreement, ()) = self
            .commit(agreement, |agreement| {
                let idx = locate_dimension(agreement, dimension_id)?;
                authorize_dimension(actor, agreement, idx, Action::ContributeToDimension)?;
                agreement.dimensions[idx].indicators.push(indicator.clone());
                Ok(())
            })
            .await?;

        info!(dimension_id, indicator_id = indicator.id, actor_id = actor.user_id, "Added indicator");
        let ctx = ViewContext::load(self.store.as_ref(), std::slice::from_ref(&agreement)).await?;
        Ok(ctx.indicator(&indicator))
    }

    pub async fn update_indicator(
        &self,
        actor: &Actor,
        indicator_id: i64,
        input: UpdateIndicatorInput,
    ) -> Result<IndicatorView> {
        let agreement = self.load_by_indicator(indicator_id).await?;
        let (d, _) = locate_indicator(&agreement, indicator_id)?;
        authorize_dimension(actor, &agreement, d, Action::ContributeToDimension)?;

        let name = input
            .nombre
            .as_deref()
            .map(|n| required_text("nombre", n))
            .transpose()?;
        let target = input.meta.map(|v| check_score("meta", v)).transpose()?;
        let evaluation = input
            .evaluacion
            .map(|v| check_score("evaluacion", v))
            .transpose()?;
        let work_line_id = match input.linea_trabajo.as_deref() {
            Some(name) => Some(work_lines::find_or_create(self.store.as_ref(), name).await?.id),
            None => None,
        };

        let (agreement, indicator) = self
            .commit(agreement, |agreement| {
                let (d, i) = locate_indicator(agreement, indicator_id)?;
                authorize_dimension(actor, agreement, d, Action::ContributeToDimension)?;

                let indicator = &mut agreement.dimensions[d].indicators[i];
                if let Some(name) = &name {
                    indicator.name = name.clone();
                }
                if let Some(description) = &input.descripcion {
                    indicator.description = description.clone();
                }
                if target.is_some() {
                    indicator.target = target;
                }
                if evaluation.is_some() {
                    indicator.evaluation = evaluation;
                }
                if let Some(considerations) = &input.consideraciones {
                    indicator.considerations = considerations.clone();
                }
                if work_line_id.is_some() {
                    indicator.work_line_id = work_line_id;
                }
                Ok(indicator.clone())
            })
            .await?;

        info!(indicator_id, actor_id = actor.user_id, "Updated indicator");
        let ctx = ViewContext::load(self.store.as_ref(), std::slice::from_ref(&agreement)).await?;
        Ok(ctx.indicator(&indicator))
    }

    /// Add a task, storing the uploaded evidence file if one is given
    pub async fn add_task(
        &self,
        actor: &Actor,
        indicator_id: i64,
        input: TaskInput,
        upload: Option<EvidenceUpload>,
    ) -> Result<TaskView> {
        let agreement = self.load_by_indicator(indicator_id).await?;
        let (d, _) = locate_indicator(&agreement, indicator_id)?;
        authorize_dimension(actor, &agreement, d, Action::ContributeToDimension)?;

        let mut task = self.build_task(input).await?;
        let stored = match &upload {
            Some(upload) => Some(self.evidence.save(upload).await?),
            None => None,
        };
        task.evidence = stored.clone();

        let committed = self
            .commit(agreement, |agreement| {
                let (d, i) = locate_indicator(agreement, indicator_id)?;
                authorize_dimension(actor, agreement, d, Action::ContributeToDimension)?;
                agreement.dimensions[d].indicators[i].tasks.push(task.clone());
                Ok(())
            })
            .await;
        if let Err(e) = committed {
            if let Some(name) = &stored {
                self.evidence.remove(name).await;
            }
            return Err(e);
        }

        info!(indicator_id, task_id = task.id, actor_id = actor.user_id, evidence = stored.is_some(), "Added task");
        Ok(TaskView::from(&task))
    }

    /// Patch a task; an upload replaces the previous evidence file
    ///
    /// The evidence name can only come from an upload. A text `evidencias`
    /// may clear it or repeat the current name, anything else is rejected.
    pub async fn update_task(
        &self,
        actor: &Actor,
        task_id: i64,
        input: UpdateTaskInput,
        upload: Option<EvidenceUpload>,
    ) -> Result<TaskView> {
        let agreement = self.load_by_task(task_id).await?;
        let (d, _, _) = locate_task(&agreement, task_id)?;
        authorize_dimension(actor, &agreement, d, Action::ContributeToDimension)?;

        let description = input
            .descripcion
            .as_deref()
            .map(|v| required_text("descripcion", v))
            .transpose()?;
        let deadline = input
            .plazo
            .as_ref()
            .map(|v| parse_optional_date("plazo", v.as_deref()))
            .transpose()?;
        let completed = input
            .cumplimiento
            .as_ref()
            .map(|v| parse_optional_date("cumplimiento", v.as_deref()))
            .transpose()?;
        let observation = input.obs.map(non_empty);
        let evidence_text = input.evidencias.map(non_empty);

        let stored = match &upload {
            Some(upload) => Some(self.evidence.save(upload).await?),
            None => None,
        };

        let committed = self
            .commit(agreement, |agreement| {
                let (d, i, t) = locate_task(agreement, task_id)?;
                authorize_dimension(actor, agreement, d, Action::ContributeToDimension)?;

                let task = &mut agreement.dimensions[d].indicators[i].tasks[t];
                let previous = task.evidence.clone();
                if stored.is_some() {
                    task.evidence = stored.clone();
                } else {
                    match &evidence_text {
                        None => {}
                        Some(None) => task.evidence = None,
                        Some(Some(name)) if previous.as_deref() == Some(name.as_str()) => {}
                        Some(Some(_)) => {
                            return Err(ConvenioError::BadRequest(
                                "evidencias can only be set by uploading a PDF file".into(),
                            ))
                        }
                    }
                }
                if let Some(description) = &description {
                    task.description = description.clone();
                }
                if let Some(deadline) = deadline {
                    task.deadline = deadline;
                }
                if let Some(completed) = completed {
                    task.completed_on = completed;
                }
                if let Some(observation) = &observation {
                    task.observation = observation.clone();
                }
                Ok((task.clone(), previous))
            })
            .await;

        let (task, previous) = match committed {
            Ok((_, out)) => out,
            Err(e) => {
                if let Some(name) = &stored {
                    self.evidence.remove(name).await;
                }
                return Err(e);
            }
        };

        // Replaced or cleared files go
        if let Some(old) = previous {
            if task.evidence.as_deref() != Some(old.as_str()) {
                self.evidence.remove(&old).await;
            }
        }

        info!(task_id, actor_id = actor.user_id, evidence = stored.is_some(), "Updated task");
        Ok(TaskView::from(&task))
    }

    /// Agreements created by the acting director, newest start date first
    pub async fn list_by_creator(&self, actor: &Actor) -> Result<Vec<AgreementView>> {
        authorize(actor, Resource::Global, Action::ListOwnAgreements)?;

        let agreements = self.store.list_agreements_by_creator(actor.user_id).await?;
        self.views(agreements).await
    }

    /// Agreements visible to the acting user as a reviewer or responsible
    ///
    /// Reviewers see every agreement, other permitted roles only those where
    /// they are responsible for a dimension.
    pub async fn list_assigned(&self, actor: &Actor) -> Result<Vec<AgreementView>> {
        authorize(actor, Resource::Global, Action::ListAssignedAgreements)?;

        let agreements = if actor.role == Role::Revisor {
            self.store.list_agreements().await?
        } else {
            self.store
                .list_agreements_by_responsible(actor.user_id)
                .await?
        };
        self.views(agreements).await
    }

    /// Mark an agreement inactive
    pub async fn finalize(&self, actor: &Actor, id: i64) -> Result<AgreementView> {
        let agreement = self.load(id).await?;
        authorize(actor, Resource::Agreement(&agreement), Action::FinalizeAgreement)?;

        let (agreement, ()) = self
            .commit(agreement, |agreement| {
                agreement.active = false;
                Ok(())
            })
            .await?;

        info!(agreement_id = id, actor_id = actor.user_id, "Finalized agreement");
        self.view(&agreement).await
    }

    // -------------------------------------------------------------------------
    // Subtree construction
    // -------------------------------------------------------------------------

    async fn build_agreement(
        &self,
        creator_id: i64,
        org_unit_id: i64,
        input: CreateAgreementInput,
        origin: Origin,
    ) -> Result<AgreementDoc> {
        let title = required_text("titulo", &input.titulo)?;
        let start_date = parse_date("fechaInicio", &input.fecha_inicio)?;
        let end_date = parse_date("fechaFin", &input.fecha_fin)?;

        let mut dimensions = Vec::with_capacity(input.dimensiones.len());
        for dimension in input.dimensiones {
            dimensions.push(self.build_dimension(dimension, org_unit_id, origin).await?);
        }

        let agreement = AgreementDoc {
            id: self.store.next_id(Sequence::Agreements).await?,
            metadata: Metadata::new(),
            version: 0,
            title,
            description: input.descripcion,
            start_date,
            end_date,
            active: input.activo.unwrap_or(true),
            creator_id,
            org_unit_id,
            dimensions,
        };
        check_period(&agreement)?;
        Ok(agreement)
    }

    async fn build_dimension(
        &self,
        input: DimensionInput,
        org_unit_id: i64,
        origin: Origin,
    ) -> Result<DimensionDoc> {
        let name = required_text("nombre", &input.nombre)?;
        let weight = match (input.ponderacion, origin) {
            (Some(weight), _) => check_weight(weight)?,
            (None, Origin::Import) => 0.0,
            (None, Origin::Api) => {
                return Err(ConvenioError::BadRequest(format!(
                    "Dimension '{name}' requires a weight (ponderacion)"
                )))
            }
        };

        let responsible_ids = match input.responsibles() {
            Some(ids) => self.validate_responsibles(&ids, org_unit_id).await?,
            None => Vec::new(),
        };

        let mut indicators = Vec::with_capacity(input.indicadores.len());
        for indicator in input.indicadores {
            indicators.push(self.build_indicator(indicator, origin).await?);
        }

        Ok(DimensionDoc {
            id: self.store.next_id(Sequence::Dimensions).await?,
            name,
            weight,
            responsible_ids,
            indicators,
        })
    }

    async fn build_indicator(&self, input: IndicatorInput, origin: Origin) -> Result<IndicatorDoc> {
        let name = required_text("nombre", &input.nombre)?;
        let target = input.meta.map(|v| check_score("meta", v)).transpose()?;
        let evaluation = input
            .evaluacion
            .map(|v| check_score("evaluacion", v))
            .transpose()?;

        let work_line_name = input
            .linea_trabajo
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        let work_line_id = match (work_line_name, origin) {
            (Some(name), _) => Some(work_lines::find_or_create(self.store.as_ref(), name).await?.id),
            (None, Origin::Import) => None,
            (None, Origin::Api) => {
                return Err(ConvenioError::BadRequest(format!(
                    "Indicator '{name}' requires a work line (lineaTrabajo)"
                )))
            }
        };

        let mut tasks = Vec::with_capacity(input.tareas.len());
        for task in input.tareas {
            tasks.push(self.build_task(task).await?);
        }

        Ok(IndicatorDoc {
            id: self.store.next_id(Sequence::Indicators).await?,
            name,
            description: input.descripcion,
            target,
            evaluation,
            considerations: input.consideraciones,
            work_line_id,
            tasks,
        })
    }

    async fn build_task(&self, input: TaskInput) -> Result<TaskDoc> {
        let description = required_text("descripcion", &input.descripcion)?;
        let deadline = parse_optional_date("plazo", input.plazo.as_deref())?;
        let completed_on = parse_optional_date("cumplimiento", input.cumplimiento.as_deref())?;

        Ok(TaskDoc {
            id: self.store.next_id(Sequence::Tasks).await?,
            description,
            deadline,
            completed_on,
            // Set only from an upload
            evidence: None,
            observation: non_empty(input.obs),
        })
    }

    /// Check that every user exists and belongs to the org unit
    async fn validate_responsibles(&self, ids: &[i64], org_unit_id: i64) -> Result<Vec<i64>> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let users = self.store.find_users(&ids).await?;
        for id in &ids {
            let belongs = users
                .iter()
                .any(|u| u.id == *id && u.org_unit_id == org_unit_id);
            if !belongs {
                warn!(user_id = id, org_unit_id, "Rejected responsible outside org unit");
                return Err(ConvenioError::BadRequest(format!(
                    "User {id} does not belong to the agreement's org unit"
                )));
            }
        }
        Ok(ids)
    }

    // -------------------------------------------------------------------------
    // Loading and saving
    // -------------------------------------------------------------------------

    async fn load(&self, id: i64) -> Result<AgreementDoc> {
        self.store
            .find_agreement(id)
            .await?
            .ok_or_else(|| ConvenioError::NotFound(format!("Agreement {id} not found")))
    }

    async fn load_by_dimension(&self, dimension_id: i64) -> Result<AgreementDoc> {
        self.store
            .find_agreement_by_dimension(dimension_id)
            .await?
            .ok_or_else(|| dimension_not_found(dimension_id))
    }

    async fn load_by_indicator(&self, indicator_id: i64) -> Result<AgreementDoc> {
        self.store
            .find_agreement_by_indicator(indicator_id)
            .await?
            .ok_or_else(|| indicator_not_found(indicator_id))
    }

    async fn load_by_task(&self, task_id: i64) -> Result<AgreementDoc> {
        self.store
            .find_agreement_by_task(task_id)
            .await?
            .ok_or_else(|| task_not_found(task_id))
    }

    /// Apply `edit` and replace the agreement, starting over from a fresh
    /// copy whenever another writer landed first
    ///
    /// `edit` runs once per attempt against the latest stored copy, so it
    /// re-locates nodes and re-checks permissions itself.
    async fn commit<T, F>(&self, mut agreement: AgreementDoc, mut edit: F) -> Result<(AgreementDoc, T)>
    where
        F: FnMut(&mut AgreementDoc) -> Result<T>,
    {
        let id = agreement.id;
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let out = edit(&mut agreement)?;
            if self.store.replace_agreement(agreement.clone()).await? {
                agreement.version += 1;
                return Ok((agreement, out));
            }
            debug!(agreement_id = id, attempt, "Agreement changed since it was read, retrying");
            agreement = self.load(id).await?;
        }

        warn!(agreement_id = id, attempts = MAX_WRITE_ATTEMPTS, "Giving up on contended agreement");
        Err(ConvenioError::Conflict(format!(
            "Agreement {id} is being modified concurrently, try again"
        )))
    }

    async fn view(&self, agreement: &AgreementDoc) -> Result<AgreementView> {
        let ctx = ViewContext::load(self.store.as_ref(), std::slice::from_ref(agreement)).await?;
        Ok(ctx.agreement(agreement))
    }

    async fn views(&self, mut agreements: Vec<AgreementDoc>) -> Result<Vec<AgreementView>> {
        agreements.sort_by(|a, b| {
            b.start_date
                .cmp(&a.start_date)
                .then_with(|| b.id.cmp(&a.id))
        });
        let ctx = ViewContext::load(self.store.as_ref(), &agreements).await?;
        Ok(agreements.iter().map(|a| ctx.agreement(a)).collect())
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

fn merge_responsibles(single: Option<i64>, many: Option<&[i64]>) -> Option<Vec<i64>> {
    match (single, many) {
        (None, None) => None,
        (single, many) => {
            let mut ids: Vec<i64> = many.map(<[i64]>::to_vec).unwrap_or_default();
            ids.extend(single);
            Some(ids)
        }
    }
}

fn required_text(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(ConvenioError::BadRequest(format!("{field} is required")))
    } else {
        Ok(value.to_string())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn check_weight(weight: f64) -> Result<f64> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(weight)
    } else {
        Err(ConvenioError::BadRequest(format!(
            "ponderacion must be a non-negative number, got {weight}"
        )))
    }
}

fn check_score(field: &str, score: f64) -> Result<f64> {
    if (0.0..=100.0).contains(&score) {
        Ok(score)
    } else {
        Err(ConvenioError::BadRequest(format!(
            "{field} must be between 0 and 100, got {score}"
        )))
    }
}

fn check_period(agreement: &AgreementDoc) -> Result<()> {
    if agreement.end_date < agreement.start_date {
        return Err(ConvenioError::BadRequest(
            "fechaFin cannot be before fechaInicio".into(),
        ));
    }
    Ok(())
}

fn locate_dimension(agreement: &AgreementDoc, dimension_id: i64) -> Result<usize> {
    agreement
        .dimension_index(dimension_id)
        .ok_or_else(|| dimension_not_found(dimension_id))
}

fn locate_indicator(agreement: &AgreementDoc, indicator_id: i64) -> Result<(usize, usize)> {
    agreement
        .indicator_index(indicator_id)
        .ok_or_else(|| indicator_not_found(indicator_id))
}

fn locate_task(agreement: &AgreementDoc, task_id: i64) -> Result<(usize, usize, usize)> {
    agreement
        .task_index(task_id)
        .ok_or_else(|| task_not_found(task_id))
}

/// Check `action` against the dimension at `index`
fn authorize_dimension(actor: &Actor, agreement: &AgreementDoc, index: usize, action: Action) -> Result<()> {
    authorize(
        actor,
        Resource::Dimension {
            agreement,
            dimension: &agreement.dimensions[index],
        },
        action,
    )
}

fn foreign_dimension(dimension_id: i64, agreement_id: i64) -> ConvenioError {
    ConvenioError::BadRequest(format!(
        "Dimension {dimension_id} does not belong to agreement {agreement_id}"
    ))
}

fn dimension_not_found(id: i64) -> ConvenioError {
    ConvenioError::NotFound(format!("Dimension {id} not found"))
}

fn indicator_not_found(id: i64) -> ConvenioError {
    ConvenioError::NotFound(format!("Indicator {id} not found"))
}

fn task_not_found(id: i64) -> ConvenioError {
    ConvenioError::NotFound(format!("Task {id} not found"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::schemas::{OrgUnitDoc, UserDoc};
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use chrono::NaiveDate;

    pub(crate) struct Fixture {
        pub store: Arc<MemoryStore>,
        pub service: AgreementService,
        pub director: Actor,
        pub manager: Actor,
        pub other_manager: Actor,
        pub reviewer: Actor,
        pub outsider: Actor,
        _dir: tempfile::TempDir,
    }

    async fn add_user(store: &MemoryStore, id: i64, role: Role, org_unit_id: i64) -> Actor {
        let email = format!("user{id}@escuela.cl");
        store
            .insert_user(UserDoc {
                id,
                name: format!("User {id}"),
                email: email.clone(),
                role,
                org_unit_id,
                ..Default::default()
            })
            .await
            .unwrap();
        Actor {
            user_id: id,
            email,
            role,
            org_unit_id,
        }
    }

    pub(crate) async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for (id, name) in [(1, "Escuela Norte"), (2, "Escuela Sur")] {
            store
                .insert_org_unit(OrgUnitDoc {
                    id,
                    name: name.into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let director = add_user(&store, 1, Role::DirectorEstablecimiento, 1).await;
        let manager = add_user(&store, 2, Role::GestionEstablecimiento, 1).await;
        let other_manager = add_user(&store, 3, Role::GestionEstablecimiento, 1).await;
        let reviewer = add_user(&store, 4, Role::Revisor, 1).await;
        let outsider = add_user(&store, 5, Role::GestionEstablecimiento, 2).await;

        let dir = tempfile::tempdir().unwrap();
        let service = AgreementService::new(store.clone(), EvidenceStore::new(dir.path()));

        Fixture {
            store,
            service,
            director,
            manager,
            other_manager,
            reviewer,
            outsider,
            _dir: dir,
        }
    }

    fn basic(title: &str) -> CreateAgreementInput {
        CreateAgreementInput {
            titulo: title.into(),
            fecha_inicio: "2025-01-01".into(),
            fecha_fin: "2025-12-31".into(),
            ..Default::default()
        }
    }

    fn dimension(name: &str, weight: Option<f64>, responsible: Option<i64>) -> DimensionInput {
        DimensionInput {
            nombre: name.into(),
            ponderacion: weight,
            responsable_id: responsible,
            ..Default::default()
        }
    }

    fn indicator(name: &str) -> IndicatorInput {
        IndicatorInput {
            nombre: name.into(),
            meta: Some(80.0),
            linea_trabajo: Some("Linea 1".into()),
            ..Default::default()
        }
    }

    fn task(description: &str) -> TaskInput {
        TaskInput {
            descripcion: description.into(),
            plazo: Some("2025-06-30".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_read_basic_agreement() {
        let f = fixture().await;

        let created = f.service.create(&f.director, basic("X")).await.unwrap();
        let fetched = f.service.get(created.id).await.unwrap();

        assert_eq!(fetched.titulo, "X");
        assert_eq!(fetched.fecha_inicio, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(fetched.fecha_fin, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
        assert!(fetched.activo);
        assert!(fetched.dimensiones.is_empty());
        assert_eq!(fetched.creado_por.as_ref().map(|u| u.id), Some(f.director.user_id));
        assert_eq!(fetched.establecimiento.as_ref().map(|o| o.id), Some(1));
    }

    #[tokio::test]
    async fn test_only_director_creates() {
        let f = fixture().await;
        for actor in [&f.manager, &f.reviewer] {
            let err = f.service.create(actor, basic("X")).await.unwrap_err();
            assert!(matches!(err, ConvenioError::Forbidden(_)));
        }
        assert!(f.store.list_agreements().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nested_create_builds_subtree_and_work_lines() {
        let f = fixture().await;

        let mut pedagogy = dimension("Gestión Pedagógica", Some(60.0), Some(f.manager.user_id));
        let mut ind = indicator("Indicador 1");
        ind.tareas.push(task("Tarea ejemplo"));
        pedagogy.indicadores.push(ind);

        let mut input = basic("Convenio 2025");
        input.dimensiones = vec![pedagogy, dimension("Convivencia", Some(40.0), None)];

        let view = f.service.create(&f.director, input).await.unwrap();
        assert_eq!(view.dimensiones.len(), 2);
        assert_eq!(view.dimensiones[0].responsables[0].id, f.manager.user_id);

        let indicator = &view.dimensiones[0].indicadores[0];
        assert_eq!(indicator.linea_trabajo.as_ref().unwrap().nombre, "Linea 1");
        assert_eq!(indicator.tareas[0].plazo, NaiveDate::from_ymd_opt(2025, 6, 30));
    }

    #[tokio::test]
    async fn test_dimension_without_weight_rejected() {
        let f = fixture().await;

        let mut input = basic("X");
        input.dimensiones = vec![dimension("Sin peso", None, None)];
        let err = f.service.create(&f.director, input).await.unwrap_err();
        assert!(matches!(err, ConvenioError::BadRequest(_)));
        // Nothing persisted on failure
        assert!(f.store.list_agreements().await.unwrap().is_empty());

        let agreement = f.service.create(&f.director, basic("Y")).await.unwrap();
        let err = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("Sin peso", None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_invalid_scores_and_dates() {
        let f = fixture().await;
        let mut input = basic("X");
        input.fecha_inicio = "no-date".into();
        assert!(matches!(
            f.service.create(&f.director, input).await.unwrap_err(),
            ConvenioError::BadRequest(_)
        ));

        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(10.0), None))
            .await
            .unwrap();
        let mut bad = indicator("I");
        bad.meta = Some(120.0);
        assert!(matches!(
            f.service.add_indicator(&f.director, dim.id, bad).await.unwrap_err(),
            ConvenioError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_responsible_outside_org_unit_rejected() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), None))
            .await
            .unwrap();

        let err = f
            .service
            .reassign_responsibles(
                &f.director,
                agreement.id,
                vec![Assignment {
                    dimension_id: dim.id,
                    responsable_ids: vec![f.outsider.user_id],
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::BadRequest(_)));

        let mut nested = basic("Y");
        nested.dimensiones = vec![dimension("D", Some(1.0), Some(f.outsider.user_id))];
        assert!(matches!(
            f.service.create(&f.director, nested).await.unwrap_err(),
            ConvenioError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_reassign_validates_dimensions_and_clears() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let other = f.service.create(&f.director, basic("Z")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), Some(f.manager.user_id)))
            .await
            .unwrap();
        let foreign = f
            .service
            .add_dimension(&f.director, other.id, dimension("F", Some(50.0), None))
            .await
            .unwrap();

        let err = f
            .service
            .reassign_responsibles(
                &f.director,
                agreement.id,
                vec![Assignment {
                    dimension_id: foreign.id,
                    responsable_ids: vec![],
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::BadRequest(_)));

        // Only the creator reassigns
        let err = f
            .service
            .reassign_responsibles(&f.manager, agreement.id, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::Forbidden(_)));

        let view = f
            .service
            .reassign_responsibles(
                &f.director,
                agreement.id,
                vec![Assignment {
                    dimension_id: dim.id,
                    responsable_ids: vec![],
                }],
            )
            .await
            .unwrap();
        assert!(view.dimensiones[0].responsables.is_empty());
    }

    #[tokio::test]
    async fn test_manager_edit_rights() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), Some(f.manager.user_id)))
            .await
            .unwrap();

        // Responsible manager may edit the agreement and the dimension
        let updated = f
            .service
            .update(&f.manager, agreement.id, UpdateAgreementInput {
                titulo: Some("X2".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.titulo, "X2");

        let renamed = f
            .service
            .update_dimension(&f.manager, dim.id, UpdateDimensionInput {
                nombre: Some("D2".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(renamed.nombre, "D2");

        // but not change who is responsible
        let err = f
            .service
            .update_dimension(&f.manager, dim.id, UpdateDimensionInput {
                responsable_ids: Some(vec![f.other_manager.user_id]),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::Forbidden(_)));

        // A manager with no responsibility is locked out
        let err = f
            .service
            .update(&f.other_manager, agreement.id, UpdateAgreementInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_update_replaces_subtree() {
        let f = fixture().await;
        let mut input = basic("X");
        let mut dim = dimension("Vieja", Some(100.0), None);
        dim.indicadores.push(indicator("I"));
        input.dimensiones.push(dim);
        let created = f.service.create(&f.director, input).await.unwrap();
        let old_indicator = created.dimensiones[0].indicadores[0].id;

        let updated = f
            .service
            .update(&f.director, created.id, UpdateAgreementInput {
                dimensiones: Some(vec![dimension("Nueva", Some(100.0), None)]),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.dimensiones.len(), 1);
        assert_eq!(updated.dimensiones[0].nombre, "Nueva");
        assert!(f
            .store
            .find_agreement_by_indicator(old_indicator)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_indicator_and_task_permissions() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), Some(f.manager.user_id)))
            .await
            .unwrap();

        let ind = f.service.add_indicator(&f.manager, dim.id, indicator("I")).await.unwrap();
        // Elevated role without responsibility
        f.service.add_indicator(&f.reviewer, dim.id, indicator("I2")).await.unwrap();

        let other_director = add_user(&f.store, 9, Role::DirectorEstablecimiento, 1).await;
        let err = f
            .service
            .add_task(&other_director, ind.id, task("T"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::Forbidden(_)));

        let created = f.service.add_task(&f.manager, ind.id, task("T"), None).await.unwrap();
        let updated = f
            .service
            .update_task(&f.director, created.id, UpdateTaskInput {
                plazo: Some(Some(String::new())),
                cumplimiento: Some(Some("2025-07-01".into())),
                ..Default::default()
            }, None)
            .await
            .unwrap();
        assert_eq!(updated.plazo, None);
        assert_eq!(updated.cumplimiento, NaiveDate::from_ymd_opt(2025, 7, 1));

        let err = f
            .service
            .update_task(&f.director, created.id, UpdateTaskInput {
                plazo: Some(Some("31-12-2025".into())),
                ..Default::default()
            }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_update_indicator_partial() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), None))
            .await
            .unwrap();
        let ind = f.service.add_indicator(&f.director, dim.id, indicator("I")).await.unwrap();

        let updated = f
            .service
            .update_indicator(&f.director, ind.id, UpdateIndicatorInput {
                evaluacion: Some(75.0),
                linea_trabajo: Some("Linea 2".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.nombre, "I");
        assert_eq!(updated.meta, Some(80.0));
        assert_eq!(updated.evaluacion, Some(75.0));
        assert_eq!(updated.linea_trabajo.unwrap().nombre, "Linea 2");

        assert!(matches!(
            f.service
                .update_indicator(&f.director, 999, UpdateIndicatorInput::default())
                .await
                .unwrap_err(),
            ConvenioError::NotFound(_)
        ));
    }

    fn pdf_upload(body: &'static [u8]) -> EvidenceUpload {
        EvidenceUpload::new(
            Some("acta.pdf".into()),
            Some("application/pdf".into()),
            Bytes::from_static(body),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_evidence_name_only_comes_from_uploads() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), None))
            .await
            .unwrap();
        let ind = f.service.add_indicator(&f.director, dim.id, indicator("I")).await.unwrap();

        let with_file = f
            .service
            .add_task(&f.director, ind.id, task("A"), Some(pdf_upload(b"%PDF-A")))
            .await
            .unwrap();
        let file_a = with_file.evidencias.clone().unwrap();

        // A create body naming someone else's file is ignored
        let input: TaskInput = serde_json::from_value(serde_json::json!({
            "descripcion": "B",
            "evidencias": file_a,
        }))
        .unwrap();
        let other = f.service.add_task(&f.director, ind.id, input, None).await.unwrap();
        assert_eq!(other.evidencias, None);

        let err = f
            .service
            .update_task(&f.director, other.id, UpdateTaskInput {
                evidencias: Some(Some(file_a.clone())),
                ..Default::default()
            }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvenioError::BadRequest(_)));

        // Uploading on the other task leaves the first file alone
        f.service
            .update_task(&f.director, other.id, UpdateTaskInput::default(), Some(pdf_upload(b"%PDF-B")))
            .await
            .unwrap();
        assert_eq!(&f.service.evidence().load(&file_a).await.unwrap()[..], b"%PDF-A");

        // Repeating the current name changes nothing
        let same = f
            .service
            .update_task(&f.director, with_file.id, UpdateTaskInput {
                evidencias: Some(Some(file_a.clone())),
                ..Default::default()
            }, None)
            .await
            .unwrap();
        assert_eq!(same.evidencias.as_deref(), Some(file_a.as_str()));
        assert!(f.service.evidence().load(&file_a).await.is_ok());
    }

    #[tokio::test]
    async fn test_clearing_evidence_deletes_file() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), None))
            .await
            .unwrap();
        let ind = f.service.add_indicator(&f.director, dim.id, indicator("I")).await.unwrap();
        let created = f
            .service
            .add_task(&f.director, ind.id, task("T"), Some(pdf_upload(b"%PDF-1")))
            .await
            .unwrap();
        let file = created.evidencias.unwrap();

        let cleared = f
            .service
            .update_task(&f.director, created.id, UpdateTaskInput {
                evidencias: Some(Some(String::new())),
                ..Default::default()
            }, None)
            .await
            .unwrap();
        assert_eq!(cleared.evidencias, None);
        assert!(matches!(
            f.service.evidence().load(&file).await.unwrap_err(),
            ConvenioError::NotFound(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_task_adds_are_not_lost() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), None))
            .await
            .unwrap();
        let indicator_id = f.service.add_indicator(&f.director, dim.id, indicator("I")).await.unwrap().id;

        let handles: Vec<_> = (0..64)
            .map(|n| {
                let service = f.service.clone();
                let actor = f.director.clone();
                tokio::spawn(async move {
                    service
                        .add_task(&actor, indicator_id, task(&format!("T{n}")), None)
                        .await
                })
            })
            .collect();

        let mut added = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => added += 1,
                Err(e) => assert!(matches!(e, ConvenioError::Conflict(_)), "unexpected error: {e}"),
            }
        }
        assert!(added > 0);

        let view = f.service.get(agreement.id).await.unwrap();
        assert_eq!(view.dimensiones[0].indicadores[0].tareas.len(), added);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mixed_writes_all_land() {
        let f = fixture().await;
        let mut input = basic("X");
        input.dimensiones = vec![dimension("D", Some(50.0), None)];
        let created = f.service.create(&f.director, input).await.unwrap();
        let agreement_id = created.id;
        let dimension_id = created.dimensiones[0].id;

        let indicators = {
            let service = f.service.clone();
            let actor = f.director.clone();
            tokio::spawn(async move {
                let mut added = 0;
                for n in 0..10 {
                    if service.add_indicator(&actor, dimension_id, indicator(&format!("I{n}"))).await.is_ok() {
                        added += 1;
                    }
                }
                added
            })
        };
        let reassign = {
            let service = f.service.clone();
            let actor = f.director.clone();
            let manager = f.manager.user_id;
            tokio::spawn(async move {
                for _ in 0..10 {
                    service
                        .reassign_responsibles(&actor, agreement_id, vec![Assignment {
                            dimension_id,
                            responsable_ids: vec![manager],
                        }])
                        .await
                        .unwrap();
                }
            })
        };

        let added = indicators.await.unwrap();
        reassign.await.unwrap();

        let view = f.service.get(agreement_id).await.unwrap();
        assert_eq!(added, 10);
        assert_eq!(view.dimensiones[0].indicadores.len(), 10);
        assert_eq!(view.dimensiones[0].responsables[0].id, f.manager.user_id);
    }

    #[tokio::test]
    async fn test_task_evidence_upload_and_replace() {
        let f = fixture().await;
        let agreement = f.service.create(&f.director, basic("X")).await.unwrap();
        let dim = f
            .service
            .add_dimension(&f.director, agreement.id, dimension("D", Some(50.0), None))
            .await
            .unwrap();
        let ind = f.service.add_indicator(&f.director, dim.id, indicator("I")).await.unwrap();

        let upload = |body: &'static [u8]| {
            EvidenceUpload::new(
                Some("acta.pdf".into()),
                Some("application/pdf".into()),
                Bytes::from_static(body),
            )
            .unwrap()
        };

        let created = f
            .service
            .add_task(&f.director, ind.id, task("T"), Some(upload(b"%PDF-1")))
            .await
            .unwrap();
        let first = created.evidencias.clone().unwrap();
        assert_eq!(&f.service.evidence().load(&first).await.unwrap()[..], b"%PDF-1");

        let updated = f
            .service
            .update_task(&f.director, created.id, UpdateTaskInput::default(), Some(upload(b"%PDF-2")))
            .await
            .unwrap();
        let second = updated.evidencias.unwrap();
        assert_ne!(first, second);
        assert!(f.service.evidence().load(&first).await.is_err());
        assert_eq!(&f.service.evidence().load(&second).await.unwrap()[..], b"%PDF-2");
    }

    #[tokio::test]
    async fn test_list_assigned_by_role() {
        let f = fixture().await;
        let mut assigned = basic("Asignado");
        assigned.fecha_inicio = "2024-01-01".into();
        assigned.dimensiones = vec![dimension("D", Some(50.0), Some(f.manager.user_id))];
        let assigned = f.service.create(&f.director, assigned).await.unwrap();
        f.service.create(&f.director, basic("Libre")).await.unwrap();

        let all = f.service.list_assigned(&f.reviewer).await.unwrap();
        assert_eq!(all.len(), 2);
        // Newest start date first
        assert_eq!(all[0].titulo, "Libre");

        let mine = f.service.list_assigned(&f.manager).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, assigned.id);

        assert!(f.service.list_assigned(&f.other_manager).await.unwrap().is_empty());

        let admin = add_user(&f.store, 10, Role::Admin, 1).await;
        assert!(matches!(
            f.service.list_assigned(&admin).await.unwrap_err(),
            ConvenioError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn test_list_by_creator_and_finalize() {
        let f = fixture().await;
        let created = f.service.create(&f.director, basic("X")).await.unwrap();

        assert_eq!(f.service.list_by_creator(&f.director).await.unwrap().len(), 1);
        assert!(f.service.list_by_creator(&f.reviewer).await.is_err());

        assert!(matches!(
            f.service.finalize(&f.director, created.id).await.unwrap_err(),
            ConvenioError::Forbidden(_)
        ));
        let finalized = f.service.finalize(&f.reviewer, created.id).await.unwrap();
        assert!(!finalized.activo);

        let summaries = f.service.list().await.unwrap();
        assert!(!summaries[0].activo);
        assert_eq!(summaries[0].establecimiento.as_ref().unwrap().nombre, "Escuela Norte");
    }

    #[tokio::test]
    async fn test_missing_ids_are_not_found() {
        let f = fixture().await;
        assert!(matches!(f.service.get(42).await.unwrap_err(), ConvenioError::NotFound(_)));
        assert!(matches!(
            f.service
                .add_indicator(&f.director, 42, indicator("I"))
                .await
                .unwrap_err(),
            ConvenioError::NotFound(_)
        ));
        assert!(matches!(
            f.service
                .update_task(&f.director, 42, UpdateTaskInput::default(), None)
                .await
                .unwrap_err(),
            ConvenioError::NotFound(_)
        ));
    }
}
