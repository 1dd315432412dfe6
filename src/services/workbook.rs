//! Spreadsheet template export and bulk import
//!
//! The workbook has one sheet per level of the aggregate. Child rows point
//! at their parent by name (`dimensionNombre`, `indicadorNombre`), so names
//! act as keys within one workbook and a repeated name shadows the earlier
//! row for lookups.

use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, info};

use crate::auth::Actor;
use crate::services::agreements::{
    AgreementService, CreateAgreementInput, DimensionInput, IndicatorInput, TaskInput,
};
use crate::services::dates::{from_excel_serial, parse_date};
use crate::types::{ConvenioError, Result};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const TEMPLATE_FILENAME: &str = "plantilla_convenio.xlsx";

const AGREEMENT_SHEET: &str = "Convenio";
const WORK_LINE_SHEET: &str = "LineasTrabajo";
const DIMENSION_SHEET: &str = "Dimensiones";
const INDICATOR_SHEET: &str = "Indicadores";
const TASK_SHEET: &str = "Tareas";

/// Example cell in the template
enum Sample {
    Text(&'static str),
    Number(f64),
}

/// Sheet name, headers and the example row
fn template_sheets() -> [(&'static str, Vec<(&'static str, Sample)>); 5] {
    use Sample::{Number, Text};
    [
        (
            AGREEMENT_SHEET,
            vec![
                ("titulo", Text("Convenio de ejemplo")),
                ("descripcion", Text("Descripción del convenio")),
                ("fechaInicio", Text("2025-01-01")),
                ("fechaFin", Text("2025-12-31")),
                ("creadoPorEmail", Text("usuario@correo.com")),
            ],
        ),
        (
            WORK_LINE_SHEET,
            vec![
                ("nombre", Text("Linea 1")),
                ("descripcion", Text("Descripción de la línea de trabajo")),
            ],
        ),
        (
            DIMENSION_SHEET,
            vec![
                ("nombre", Text("Gestión Pedagógica")),
                ("ponderacion", Number(100.0)),
            ],
        ),
        (
            INDICATOR_SHEET,
            vec![
                ("nombre", Text("Indicador 1")),
                ("descripcion", Text("Descripción del indicador")),
                ("meta", Number(80.0)),
                ("evaluacion", Text("")),
                ("consideraciones", Text("Consideraciones")),
                ("dimensionNombre", Text("Gestión Pedagógica")),
                ("lineaTrabajo", Text("Linea 1")),
            ],
        ),
        (
            TASK_SHEET,
            vec![
                ("descripcion", Text("Tarea ejemplo")),
                ("plazo", Text("2025-06-30")),
                ("cumplimiento", Text("")),
                ("evidencias", Text("")),
                ("obs", Text("")),
                ("indicadorNombre", Text("Indicador 1")),
            ],
        ),
    ]
}

/// Build the import template as xlsx bytes
pub fn export_template() -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    for (name, columns) in template_sheets() {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name)?;

        for (col, (title, sample)) in columns.iter().enumerate() {
            let col = col as u16;
            sheet.write_string_with_format(0, col, *title, &header)?;
            match sample {
                Sample::Text("") => {}
                Sample::Text(text) => {
                    sheet.write_string(1, col, *text)?;
                }
                Sample::Number(n) => {
                    sheet.write_number(1, col, *n)?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Result of a successful import
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub mensaje: String,
    pub convenio_id: i64,
    pub dimensiones: usize,
    pub indicadores: usize,
    pub tareas: usize,
}

/// Agreement data read from a workbook
#[derive(Debug, Clone)]
pub struct ParsedWorkbook {
    pub creator_email: Option<String>,
    pub agreement: CreateAgreementInput,
}

/// Parse a workbook and persist it as one agreement
pub async fn import(service: &AgreementService, actor: &Actor, data: &[u8]) -> Result<ImportSummary> {
    let parsed = parse_workbook(data)?;
    let agreement = service
        .create_imported(actor, parsed.creator_email.as_deref(), parsed.agreement)
        .await?;

    let indicators: usize = agreement.dimensions.iter().map(|d| d.indicators.len()).sum();
    let tasks: usize = agreement
        .dimensions
        .iter()
        .flat_map(|d| d.indicators.iter())
        .map(|i| i.tasks.len())
        .sum();

    info!(agreement_id = agreement.id, indicators, tasks, "Workbook import complete");
    Ok(ImportSummary {
        mensaje: "Import successful".into(),
        convenio_id: agreement.id,
        dimensiones: agreement.dimensions.len(),
        indicadores: indicators,
        tareas: tasks,
    })
}

/// Read the agreement and its subtree out of a workbook
pub fn parse_workbook(data: &[u8]) -> Result<ParsedWorkbook> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data.to_vec()))?;
    let sheet_names = workbook.sheet_names();

    let mut read_sheet = |name: &str| -> Result<Option<Vec<Row>>> {
        if !sheet_names.iter().any(|s| s == name) {
            return Ok(None);
        }
        let range = workbook.worksheet_range(name)?;
        Ok(Some(rows_of(name, &range)))
    };

    let agreement_rows = read_sheet(AGREEMENT_SHEET)?.ok_or_else(|| {
        ConvenioError::Import(format!("Sheet \"{AGREEMENT_SHEET}\" not found"))
    })?;
    let dimension_rows = read_sheet(DIMENSION_SHEET)?.unwrap_or_default();
    let indicator_rows = read_sheet(INDICATOR_SHEET)?.unwrap_or_default();
    let task_rows = read_sheet(TASK_SHEET)?.unwrap_or_default();

    let head = agreement_rows
        .first()
        .ok_or_else(incomplete_agreement)?;
    let titulo = head.text("titulo").ok_or_else(incomplete_agreement)?;
    let fecha_inicio = head.date("fechaInicio")?.ok_or_else(incomplete_agreement)?;
    let fecha_fin = head.date("fechaFin")?.ok_or_else(incomplete_agreement)?;

    let mut agreement = CreateAgreementInput {
        titulo,
        descripcion: head.text("descripcion").unwrap_or_default(),
        fecha_inicio,
        fecha_fin,
        activo: None,
        dimensiones: Vec::new(),
    };

    let mut dimension_by_name: HashMap<String, usize> = HashMap::new();
    for row in &dimension_rows {
        let Some(name) = row.text("nombre") else {
            continue;
        };
        dimension_by_name.insert(name.clone(), agreement.dimensiones.len());
        agreement.dimensiones.push(DimensionInput {
            nombre: name,
            ponderacion: row.number("ponderacion")?,
            ..Default::default()
        });
    }

    let mut indicator_by_name: HashMap<String, (usize, usize)> = HashMap::new();
    for row in &indicator_rows {
        let Some(name) = row.text("nombre") else {
            continue;
        };
        let Some(&d) = row
            .text("dimensionNombre")
            .and_then(|parent| dimension_by_name.get(&parent))
        else {
            debug!(row = row.line, indicator = %name, "Skipping indicator with unknown dimension");
            continue;
        };

        let indicators = &mut agreement.dimensiones[d].indicadores;
        indicator_by_name.insert(name.clone(), (d, indicators.len()));
        indicators.push(IndicatorInput {
            nombre: name,
            descripcion: row.text("descripcion").unwrap_or_default(),
            meta: row.number("meta")?,
            evaluacion: row.number("evaluacion")?,
            consideraciones: row.text("consideraciones").unwrap_or_default(),
            linea_trabajo: row.text("lineaTrabajo"),
            tareas: Vec::new(),
        });
    }

    for row in &task_rows {
        let (Some(description), Some(parent)) = (row.text("descripcion"), row.text("indicadorNombre")) else {
            continue;
        };
        let Some(&(d, i)) = indicator_by_name.get(&parent) else {
            debug!(row = row.line, indicator = %parent, "Skipping task with unknown indicator");
            continue;
        };

        agreement.dimensiones[d].indicadores[i].tareas.push(TaskInput {
            descripcion: description,
            plazo: row.date("plazo")?,
            cumplimiento: row.date("cumplimiento")?,
            obs: row.text("obs"),
        });
    }

    Ok(ParsedWorkbook {
        creator_email: head.text("creadoPorEmail"),
        agreement,
    })
}

fn incomplete_agreement() -> ConvenioError {
    ConvenioError::Import(format!(
        "Incomplete data in sheet \"{AGREEMENT_SHEET}\": titulo, fechaInicio and fechaFin are required"
    ))
}

/// One data row keyed by header name
struct Row {
    sheet: String,
    /// 1-based spreadsheet row number
    line: usize,
    cells: HashMap<String, Data>,
}

/// Data rows of a sheet, skipping the header and blank rows
fn rows_of(sheet: &str, range: &Range<Data>) -> Vec<Row> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<Option<String>> = header.iter().map(cell_text).collect();
    let first_line = range.start().map(|(r, _)| r as usize + 1).unwrap_or(1);

    rows.enumerate()
        .filter(|(_, cells)| cells.iter().any(|c| cell_text(c).is_some()))
        .map(|(n, cells)| Row {
            sheet: sheet.to_string(),
            line: first_line + n + 1,
            cells: headers
                .iter()
                .zip(cells.iter())
                .filter_map(|(h, c)| h.clone().map(|h| (h, c.clone())))
                .collect(),
        })
        .collect()
}

impl Row {
    fn text(&self, column: &str) -> Option<String> {
        self.cells.get(column).and_then(cell_text)
    }

    fn number(&self, column: &str) -> Result<Option<f64>> {
        match self.cells.get(column) {
            None | Some(Data::Empty) => Ok(None),
            Some(Data::Float(f)) => Ok(Some(*f)),
            Some(Data::Int(i)) => Ok(Some(*i as f64)),
            Some(Data::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Data::String(s)) => s
                .trim()
                .replace(',', ".")
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.invalid(column, s)),
            Some(other) => Err(self.invalid(column, &other.to_string())),
        }
    }

    /// Date cell as `YYYY-MM-DD`; accepts text and Excel date serials
    fn date(&self, column: &str) -> Result<Option<String>> {
        let serial = match self.cells.get(column) {
            None | Some(Data::Empty) => return Ok(None),
            Some(Data::DateTime(dt)) => dt.as_f64(),
            Some(Data::Float(f)) => *f,
            Some(Data::Int(i)) => *i as f64,
            Some(Data::String(s)) | Some(Data::DateTimeIso(s)) => {
                if s.trim().is_empty() {
                    return Ok(None);
                }
                return parse_date(column, s)
                    .map(|d| Some(d.to_string()))
                    .map_err(|_| self.invalid(column, s));
            }
            Some(other) => return Err(self.invalid(column, &other.to_string())),
        };

        from_excel_serial(serial)
            .map(|d| Some(d.to_string()))
            .ok_or_else(|| self.invalid(column, &serial.to_string()))
    }

    fn invalid(&self, column: &str, value: &str) -> ConvenioError {
        ConvenioError::Import(format!(
            "Invalid value '{}' in sheet \"{}\", row {}, column {}",
            value, self.sheet, self.line, column
        ))
    }
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match from_excel_serial(dt.as_f64()) {
            Some(date) => date.to_string(),
            None => dt.as_f64().to_string(),
        },
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::db::schemas::UserDoc;
    use crate::services::agreements::tests::fixture;
    use crate::store::Store;

    fn sheet_row_counts(data: &[u8]) -> HashMap<String, usize> {
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data.to_vec())).unwrap();
        workbook
            .sheet_names()
            .into_iter()
            .map(|name| {
                let range = workbook.worksheet_range(&name).unwrap();
                let count = rows_of(&name, &range).len();
                (name, count)
            })
            .collect()
    }

    #[test]
    fn test_template_has_all_sheets() {
        let data = export_template().unwrap();
        let counts = sheet_row_counts(&data);

        for sheet in [AGREEMENT_SHEET, WORK_LINE_SHEET, DIMENSION_SHEET, INDICATOR_SHEET, TASK_SHEET] {
            assert_eq!(counts.get(sheet), Some(&1), "sheet {sheet}");
        }
    }

    #[test]
    fn test_parse_template() {
        let parsed = parse_workbook(&export_template().unwrap()).unwrap();

        assert_eq!(parsed.creator_email.as_deref(), Some("usuario@correo.com"));
        assert_eq!(parsed.agreement.fecha_inicio, "2025-01-01");
        let dimension = &parsed.agreement.dimensiones[0];
        assert_eq!(dimension.ponderacion, Some(100.0));
        let indicator = &dimension.indicadores[0];
        assert_eq!(indicator.meta, Some(80.0));
        assert_eq!(indicator.evaluacion, None);
        assert_eq!(indicator.linea_trabajo.as_deref(), Some("Linea 1"));
        assert_eq!(indicator.tareas[0].plazo.as_deref(), Some("2025-06-30"));
    }

    #[test]
    fn test_garbage_is_import_error() {
        let err = parse_workbook(b"not a workbook").unwrap_err();
        assert!(matches!(err, ConvenioError::Import(_)));
    }

    #[test]
    fn test_orphans_skipped_and_serial_dates() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().set_name(AGREEMENT_SHEET).unwrap();
        for (col, title) in ["titulo", "fechaInicio", "fechaFin"].iter().enumerate() {
            sheet.write_string(0, col as u16, *title).unwrap();
        }
        sheet.write_string(1, 0, "Serial").unwrap();
        sheet.write_number(1, 1, 45658.0).unwrap();
        sheet.write_string(1, 2, "2025-12-31").unwrap();

        let sheet = workbook.add_worksheet().set_name(DIMENSION_SHEET).unwrap();
        sheet.write_string(0, 0, "nombre").unwrap();
        sheet.write_string(1, 0, "D1").unwrap();

        let sheet = workbook.add_worksheet().set_name(INDICATOR_SHEET).unwrap();
        sheet.write_string(0, 0, "nombre").unwrap();
        sheet.write_string(0, 1, "dimensionNombre").unwrap();
        sheet.write_string(1, 0, "I1").unwrap();
        sheet.write_string(1, 1, "D1").unwrap();
        sheet.write_string(2, 0, "Huérfano").unwrap();
        sheet.write_string(2, 1, "No existe").unwrap();

        let sheet = workbook.add_worksheet().set_name(TASK_SHEET).unwrap();
        sheet.write_string(0, 0, "descripcion").unwrap();
        sheet.write_string(0, 1, "indicadorNombre").unwrap();
        sheet.write_string(1, 0, "T1").unwrap();
        sheet.write_string(1, 1, "I1").unwrap();
        sheet.write_string(2, 0, "Sin padre").unwrap();
        sheet.write_string(3, 1, "I1").unwrap();

        let parsed = parse_workbook(&workbook.save_to_buffer().unwrap()).unwrap();
        assert_eq!(parsed.agreement.fecha_inicio, "2025-01-01");
        assert_eq!(parsed.creator_email, None);
        assert_eq!(parsed.agreement.dimensiones.len(), 1);
        assert_eq!(parsed.agreement.dimensiones[0].ponderacion, None);
        assert_eq!(parsed.agreement.dimensiones[0].indicadores.len(), 1);
        assert_eq!(parsed.agreement.dimensiones[0].indicadores[0].tareas.len(), 1);
    }

    #[test]
    fn test_huge_date_serial_is_import_error() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().set_name(AGREEMENT_SHEET).unwrap();
        for (col, title) in ["titulo", "fechaInicio", "fechaFin"].iter().enumerate() {
            sheet.write_string(0, col as u16, *title).unwrap();
        }
        sheet.write_string(1, 0, "Fuera de rango").unwrap();
        sheet.write_number(1, 1, 1e15).unwrap();
        sheet.write_string(1, 2, "2025-12-31").unwrap();

        let err = parse_workbook(&workbook.save_to_buffer().unwrap()).unwrap_err();
        assert!(matches!(err, ConvenioError::Import(_)));
        assert!(err.message().contains("fechaInicio"));
    }

    #[test]
    fn test_missing_title_rejected() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().set_name(AGREEMENT_SHEET).unwrap();
        sheet.write_string(0, 0, "titulo").unwrap();
        sheet.write_string(0, 1, "fechaInicio").unwrap();
        sheet.write_string(1, 1, "2025-01-01").unwrap();

        let err = parse_workbook(&workbook.save_to_buffer().unwrap()).unwrap_err();
        assert!(matches!(err, ConvenioError::Import(_)));
    }

    #[tokio::test]
    async fn test_template_roundtrip_counts_match() {
        let f = fixture().await;
        f.store
            .insert_user(UserDoc {
                id: 50,
                name: "Usuario".into(),
                email: "usuario@correo.com".into(),
                role: Role::DirectorEstablecimiento,
                org_unit_id: 2,
                ..Default::default()
            })
            .await
            .unwrap();

        let template = export_template().unwrap();
        let counts = sheet_row_counts(&template);

        let summary = import(&f.service, &f.manager, &template).await.unwrap();
        assert_eq!(summary.dimensiones, counts[DIMENSION_SHEET]);
        assert_eq!(summary.indicadores, counts[INDICATOR_SHEET]);
        assert_eq!(summary.tareas, counts[TASK_SHEET]);

        let view = f.service.get(summary.convenio_id).await.unwrap();
        assert_eq!(view.creado_por.unwrap().id, 50);
        assert_eq!(view.establecimiento.unwrap().id, 2);
        assert_eq!(view.dimensiones[0].indicadores[0].tareas.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_creator_leaves_nothing_behind() {
        let f = fixture().await;
        let err = import(&f.service, &f.manager, &export_template().unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, ConvenioError::Import(_)));
        assert!(f.store.list_agreements().await.unwrap().is_empty());
    }
}
