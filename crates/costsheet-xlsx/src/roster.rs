//! Roster store backed by an xlsx workbook
//!
//! One sheet per project, named after the project key:
//!
//! ```text
//! |      Project Info (A1:C1)       |
//! | Key          | ABC              |
//! | Display Name | Alpha            |
//! | Owner        | Olga             |
//! | Manager      | Alice            |
//! |                                 |   <- spacer (A6:C6)
//! | Name         | Position  | Rate |
//! | Jane Doe     | Developer | 40   |
//! ```

use std::path::PathBuf;

use calamine::{open_workbook_auto, Data, Range, Reader};
use rust_xlsxwriter::{Format, FormatAlign, Workbook, Worksheet, XlsxError};
use tracing::{debug, info};

use costsheet_core::{ProjectConfig, Rate, Roster, RosterError, RosterStore, UserConfig};

use crate::style::{flag_zero, thin_border};

const INFO_FILL: u32 = 0x009A00;
const INFO_FONT: u32 = 0xFFFFFF;
const BORDER: u32 = 0x000000;

const KEY_ROW: u32 = 1;
const DISPLAY_NAME_ROW: u32 = 2;
const OWNER_ROW: u32 = 3;
const MANAGER_ROW: u32 = 4;
const SPACER_ROW: u32 = 5;
const USER_HEADER_ROW: u32 = 6;
const FIRST_USER_ROW: u32 = 7;

const NAME_COL: u16 = 0;
const POSITION_COL: u16 = 1;
const RATE_COL: u16 = 2;

/// Roster persisted as an xlsx workbook
#[derive(Clone, Debug)]
pub struct XlsxRosterStore {
    pub path: PathBuf,
}

impl XlsxRosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn document_error(e: XlsxError) -> RosterError {
    RosterError::Document(e.to_string())
}

fn cell_text(range: &Range<Data>, row: u32, col: u16) -> String {
    match range.get_value((row, u32::from(col))) {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.trim().to_string(),
        Some(Data::Float(f)) if f.fract() == 0.0 => format!("{}", *f as i64),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Rate cell to whole units. Empty is 0; fractions, negatives and text fail.
fn parse_rate(cell: Option<&Data>) -> Result<Rate, String> {
    match cell {
        None | Some(Data::Empty) => Ok(0),
        Some(Data::Int(i)) => Rate::try_from(*i).map_err(|_| format!("invalid rate {i}")),
        Some(Data::Float(f)) => {
            if f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(Rate::MAX) {
                Ok(*f as Rate)
            } else {
                Err(format!("invalid rate {f}"))
            }
        }
        Some(Data::String(s)) if s.trim().is_empty() => Ok(0),
        Some(Data::String(s)) => s
            .trim()
            .parse::<Rate>()
            .map_err(|_| format!("invalid rate '{s}'")),
        Some(other) => Err(format!("invalid rate '{other}'")),
    }
}

/// The sheet name is the project key; the Key row is informational only.
/// Sheets with no info values and no users are skipped.
fn read_project(sheet: &str, range: &Range<Data>) -> Result<Option<ProjectConfig>, RosterError> {
    let key_cell = cell_text(range, KEY_ROW, 1);
    if !key_cell.is_empty() && key_cell != sheet {
        debug!(sheet, key = %key_cell, "Key cell differs from sheet name, using sheet name");
    }

    let mut project = ProjectConfig::new(sheet)
        .display_name(cell_text(range, DISPLAY_NAME_ROW, 1))
        .owner(cell_text(range, OWNER_ROW, 1))
        .manager(cell_text(range, MANAGER_ROW, 1));
    let has_info = !key_cell.is_empty()
        || !project.display_name.is_empty()
        || !project.owner.is_empty()
        || !project.manager.is_empty();

    let last_row = range.end().map(|(row, _)| row).unwrap_or(0);
    for row in FIRST_USER_ROW..=last_row {
        let name = cell_text(range, row, NAME_COL);
        if name.is_empty() {
            continue;
        }
        let position = cell_text(range, row, POSITION_COL);
        let rate = parse_rate(range.get_value((row, u32::from(RATE_COL)))).map_err(|message| {
            RosterError::Parse {
                sheet: sheet.to_string(),
                row: row + 1,
                message,
            }
        })?;
        project = project.user(name, UserConfig::new(position, rate));
    }

    if !has_info && project.users.is_empty() {
        debug!(sheet, "Empty sheet, skipped");
        return Ok(None);
    }
    Ok(Some(project))
}

struct RosterFormats {
    header: Format,
    cell: Format,
}

impl RosterFormats {
    fn new() -> Self {
        let header = thin_border(
            Format::new()
                .set_bold()
                .set_align(FormatAlign::Center)
                .set_font_color(INFO_FONT)
                .set_background_color(INFO_FILL),
            BORDER,
        );
        let cell = thin_border(Format::new(), BORDER);
        Self { header, cell }
    }
}

fn write_project(
    sheet: &mut Worksheet,
    project: &ProjectConfig,
    formats: &RosterFormats,
) -> Result<(), XlsxError> {
    sheet.set_name(&project.key)?;
    sheet.set_column_width(NAME_COL, 30)?;
    sheet.set_column_width(POSITION_COL, 30)?;
    sheet.set_column_width(RATE_COL, 10)?;

    sheet.merge_range(0, NAME_COL, 0, RATE_COL, "Project Info", &formats.header)?;

    let info = [
        (KEY_ROW, "Key", project.key.as_str()),
        (DISPLAY_NAME_ROW, "Display Name", project.display_name.as_str()),
        (OWNER_ROW, "Owner", project.owner.as_str()),
        (MANAGER_ROW, "Manager", project.manager.as_str()),
    ];
    for (row, title, value) in info {
        sheet.write_with_format(row, NAME_COL, title, &formats.cell)?;
        sheet.merge_range(row, POSITION_COL, row, RATE_COL, value, &formats.cell)?;
    }

    sheet.merge_range(SPACER_ROW, NAME_COL, SPACER_ROW, RATE_COL, "", &Format::new())?;

    for (col, title) in [(NAME_COL, "Name"), (POSITION_COL, "Position"), (RATE_COL, "Rate")] {
        sheet.write_with_format(USER_HEADER_ROW, col, title, &formats.header)?;
    }

    let mut row = FIRST_USER_ROW;
    for (name, user) in &project.users {
        sheet.write_with_format(row, NAME_COL, name.as_str(), &formats.cell)?;
        sheet.write_with_format(row, POSITION_COL, user.position.as_str(), &formats.cell)?;
        sheet.write_with_format(row, RATE_COL, f64::from(user.rate), &formats.cell)?;
        flag_zero(sheet, row, RATE_COL)?;
        row += 1;
    }

    Ok(())
}

impl RosterStore for XlsxRosterStore {
    fn load(&self) -> Result<Roster, RosterError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No roster found, starting empty");
            return Ok(Roster::default());
        }

        let mut workbook = open_workbook_auto(&self.path).map_err(|e| {
            RosterError::Document(format!("Failed to open {}: {e}", self.path.display()))
        })?;

        let mut projects = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| RosterError::Document(format!("Failed to read sheet {name}: {e}")))?;
            if let Some(project) = read_project(&name, &range)? {
                projects.push(project);
            }
        }

        info!(path = %self.path.display(), projects = projects.len(), "Roster loaded");
        Ok(Roster::new(projects))
    }

    fn save(&self, roster: &Roster) -> Result<(), RosterError> {
        let mut workbook = Workbook::new();
        let formats = RosterFormats::new();

        for project in &roster.projects {
            let mut sheet = Worksheet::new();
            write_project(&mut sheet, project, &formats).map_err(|e| {
                RosterError::Document(format!("Failed to write project {}: {e}", project.key))
            })?;
            workbook.push_worksheet(sheet);
        }

        workbook.save(&self.path).map_err(document_error)?;
        info!(path = %self.path.display(), projects = roster.projects.len(), "Roster saved");
        Ok(())
    }
}
