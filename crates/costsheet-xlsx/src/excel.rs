//! Excel timesheet report renderer
//!
//! Writes one sheet per period into the target workbook:
//!
//! ```text
//! | Name        | Manager | Position    | Rate | Total Hours  | Total Cost   | 03/01 | 03/02 | ...
//! |-------------|---------|-------------|------|--------------|--------------|-------|-------|
//! |             |         |             |      |              |              |       |       |   <- spacer
//! | Alpha       | Alice   | Olga (owner, merged)| =SUM(E4:E5)  | =SUM(F4:F5)  |       |       |
//! | Jane Doe    |         | Developer   | 40   | =SUM(G4:AK4) | =D4*E4       | 2     |       |
//! | Bob         |         |             | 0    | =SUM(G5:AK5) | =D5*E5       |       | 1.5   |
//! ```
//!
//! Totals are live formulas: editing an hour cell or a rate in Excel updates
//! the user and project totals. Rate cells carry a conditional format that
//! flags a zero rate.
//!
//! ## Color coding
//!
//! Projects are colored by manager (see [`crate::color`]). A colored project
//! gets a shaded fill and borders on its total row, and its base color with
//! shaded borders on the user rows. Projects without a manager stay unstyled.
//!
//! ## Layout bookkeeping
//!
//! All positions live in a [`LayoutContext`] created per render. Its row
//! counter only moves forward; formula ranges are taken from the counter
//! right before and after a project's user rows.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{Datelike, NaiveDate, Weekday};
use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, Workbook, Worksheet};
use tracing::{info, warn};

use costsheet_core::{seconds_to_hours, Period, Project, RenderError, Renderer, Report, User};

use crate::color::{assign_colors, HexColor, BORDER_SHADE, FILL_SHADE};
use crate::document::ExistingDocument;
use crate::style::{
    col_to_letter, flag_zero, thin_border, xlsx_error, DEFAULT_CURRENCY_FORMAT, WEEKEND_FILL,
};

/// Number of fixed columns before the first date column
pub const FIXED_COLUMNS: u16 = 6;

const HEADER_ROW: u32 = 0;
const TOTAL_ROW_BOTTOM_BORDER: u32 = 0x444444;
const SPACER_BORDER: u32 = 0xFFFFFF;

/// Header label of a date column, e.g. `03/05`
pub fn date_label(date: NaiveDate) -> String {
    format!("{:02}/{:02}", date.month(), date.day())
}

/// Sheet name for a period: `March`, or `March - April` across two months
pub fn sheet_name(period: &Period) -> String {
    let from = period.from().format("%B").to_string();
    if period.is_single_month() {
        from
    } else {
        format!("{} - {}", from, period.to().format("%B"))
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Excel timesheet renderer
#[derive(Clone, Debug)]
pub struct ExcelRenderer {
    /// Workbook the period sheet is written into
    pub target: PathBuf,
    /// Number format of rate and cost cells
    pub currency_format: String,
}

/// Hour value that could not be placed in any date column
#[derive(Clone, Debug, PartialEq)]
pub struct SkippedEffort {
    pub project: String,
    pub user: String,
    pub date: NaiveDate,
    pub hours: f64,
}

/// What a render produced
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSummary {
    pub sheet_name: String,
    /// Zero-based index of the last row written
    pub last_row: u32,
    pub skipped: Vec<SkippedEffort>,
    /// Whether a sheet with the same name existed and was replaced
    pub replaced_existing: bool,
}

/// Mutable layout state for a single render
#[derive(Clone, Debug)]
pub struct LayoutContext {
    pub name_col: u16,
    pub manager_col: u16,
    pub position_col: u16,
    pub rate_col: u16,
    pub total_hours_col: u16,
    pub total_cost_col: u16,
    pub first_date_col: u16,
    pub last_date_col: u16,
    /// Total number of columns (fixed + dates)
    pub cols_count: u16,
    /// Zero-based index of the last written row
    pub last_row: u32,
    /// Date column header label -> column
    pub date_columns: HashMap<String, u16>,
    pub project_colors: HashMap<String, HexColor>,
    pub skipped: Vec<SkippedEffort>,
}

impl LayoutContext {
    pub fn new(report: &Report) -> Self {
        Self {
            name_col: 0,
            manager_col: 1,
            position_col: 2,
            rate_col: 3,
            total_hours_col: 4,
            total_cost_col: 5,
            first_date_col: FIXED_COLUMNS,
            last_date_col: FIXED_COLUMNS,
            cols_count: FIXED_COLUMNS,
            last_row: HEADER_ROW,
            date_columns: HashMap::new(),
            project_colors: assign_colors(&report.projects),
            skipped: Vec::new(),
        }
    }

    pub fn date_column(&self, date: NaiveDate) -> Option<u16> {
        self.date_columns.get(&date_label(date)).copied()
    }

    fn next_row(&mut self) -> u32 {
        self.last_row += 1;
        self.last_row
    }
}

/// Formats used by the report sheet
struct ReportFormats {
    header: Format,
    weekend_header: Format,
    spacer: Format,
}

/// Formats of one project block, colored or plain
struct ProjectFormats {
    total: Format,
    total_centered: Format,
    total_currency: Format,
    user_text: Format,
    user_date: Format,
    user_currency: Format,
}

impl Default for ExcelRenderer {
    fn default() -> Self {
        Self {
            target: PathBuf::from("Report.xlsx"),
            currency_format: DEFAULT_CURRENCY_FORMAT.into(),
        }
    }
}

impl ExcelRenderer {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Set the number format used for rate and cost cells
    pub fn currency_format(mut self, format: impl Into<String>) -> Self {
        self.currency_format = format.into();
        self
    }

    /// Lay out the period sheet for `report` without touching the target file
    pub fn build_sheet(&self, report: &Report) -> Result<(Worksheet, LayoutContext), RenderError> {
        let mut sheet = Worksheet::new();
        sheet.set_name(sheet_name(&report.period)).map_err(xlsx_error)?;

        let formats = self.create_formats();
        let mut ctx = LayoutContext::new(report);

        self.write_header(&mut sheet, &mut ctx, &formats, &report.period)?;

        for project in &report.projects {
            info!(project = %project.key, users = project.users.len(), "Creating report for project");
            self.write_project(&mut sheet, &mut ctx, &formats, project)?;
        }

        sheet
            .set_freeze_panes(HEADER_ROW + 1, FIXED_COLUMNS)
            .map_err(xlsx_error)?;

        Ok((sheet, ctx))
    }

    fn create_formats(&self) -> ReportFormats {
        let header = Format::new().set_bold().set_align(FormatAlign::Center);
        let weekend_header = header.clone().set_background_color(WEEKEND_FILL);
        let spacer = Format::new()
            .set_border_left(FormatBorder::Thin)
            .set_border_left_color(SPACER_BORDER);

        ReportFormats {
            header,
            weekend_header,
            spacer,
        }
    }

    fn project_formats(&self, color: Option<HexColor>) -> ProjectFormats {
        let total = Format::new().set_bold();
        let user = Format::new();

        let (total, user) = match color {
            Some(color) => {
                let border = color.shade(BORDER_SHADE).to_rgb();
                let fill = color.shade(FILL_SHADE).to_rgb();
                let total = total
                    .set_background_color(fill)
                    .set_border(FormatBorder::Thin)
                    .set_border_top_color(border)
                    .set_border_left_color(border)
                    .set_border_right_color(border)
                    .set_border_bottom_color(TOTAL_ROW_BOTTOM_BORDER);
                let user = thin_border(user, border).set_background_color(color.to_rgb());
                (total, user)
            }
            None => (total, user),
        };

        ProjectFormats {
            total_centered: total.clone().set_align(FormatAlign::Center),
            total_currency: total.clone().set_num_format(&self.currency_format),
            total,
            user_date: user.clone().set_align(FormatAlign::Center),
            user_currency: user.clone().set_num_format(&self.currency_format),
            user_text: user,
        }
    }

    /// Row 1: fixed column titles followed by one `MM/DD` column per day
    fn write_header(
        &self,
        sheet: &mut Worksheet,
        ctx: &mut LayoutContext,
        formats: &ReportFormats,
        period: &Period,
    ) -> Result<(), RenderError> {
        let fixed = [
            (ctx.name_col, "Name", 25),
            (ctx.manager_col, "Manager", 25),
            (ctx.position_col, "Position", 25),
            (ctx.rate_col, "Rate", 9),
            (ctx.total_hours_col, "Total Hours", 12),
            (ctx.total_cost_col, "Total Cost", 12),
        ];
        for (col, title, width) in fixed {
            sheet
                .write_with_format(HEADER_ROW, col, title, &formats.header)
                .map_err(xlsx_error)?;
            sheet.set_column_width(col, width).map_err(xlsx_error)?;
        }

        let mut col = FIXED_COLUMNS;
        ctx.first_date_col = col;
        for date in period.days() {
            let label = date_label(date);
            let format = if is_weekend(date) {
                &formats.weekend_header
            } else {
                &formats.header
            };
            sheet
                .write_with_format(HEADER_ROW, col, label.as_str(), format)
                .map_err(xlsx_error)?;
            sheet.set_column_width(col, 6).map_err(xlsx_error)?;
            ctx.date_columns.insert(label, col);
            col += 1;
        }
        ctx.last_date_col = col - 1;
        ctx.cols_count = col;

        Ok(())
    }

    fn write_project(
        &self,
        sheet: &mut Worksheet,
        ctx: &mut LayoutContext,
        formats: &ReportFormats,
        project: &Project,
    ) -> Result<(), RenderError> {
        // spacer row
        let row = ctx.next_row();
        for col in 0..ctx.cols_count {
            sheet
                .write_blank(row, col, &formats.spacer)
                .map_err(xlsx_error)?;
        }

        let project_formats = self.project_formats(ctx.project_colors.get(&project.key).copied());

        let total_row = ctx.next_row();
        let first_user_row = total_row + 1;
        let last_user_row = total_row + project.users.len() as u32;
        self.write_project_total(
            sheet,
            ctx,
            &project_formats,
            project,
            total_row,
            first_user_row,
            last_user_row,
        )?;

        for user in &project.users {
            self.write_user(sheet, ctx, &project_formats, project, user)?;
        }
        debug_assert_eq!(ctx.last_row, last_user_row);

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_project_total(
        &self,
        sheet: &mut Worksheet,
        ctx: &LayoutContext,
        formats: &ProjectFormats,
        project: &Project,
        row: u32,
        first_user_row: u32,
        last_user_row: u32,
    ) -> Result<(), RenderError> {
        for col in 0..ctx.cols_count {
            sheet
                .write_blank(row, col, &formats.total)
                .map_err(xlsx_error)?;
        }

        sheet
            .write_with_format(row, ctx.name_col, project.title(), &formats.total)
            .map_err(xlsx_error)?;
        sheet
            .write_with_format(row, ctx.manager_col, project.manager.as_str(), &formats.total_centered)
            .map_err(xlsx_error)?;
        sheet
            .merge_range(
                row,
                ctx.position_col,
                row,
                ctx.rate_col,
                &project.owner,
                &formats.total_centered,
            )
            .map_err(xlsx_error)?;

        if project.users.is_empty() {
            // an empty range would make the SUM reference its own row
            sheet
                .write_with_format(row, ctx.total_hours_col, 0.0, &formats.total)
                .map_err(xlsx_error)?;
            sheet
                .write_with_format(row, ctx.total_cost_col, 0.0, &formats.total_currency)
                .map_err(xlsx_error)?;
            return Ok(());
        }

        let hours = col_to_letter(ctx.total_hours_col);
        let cost = col_to_letter(ctx.total_cost_col);
        let (first, last) = (first_user_row + 1, last_user_row + 1);

        let formula = format!("=SUM({hours}{first}:{hours}{last})");
        sheet
            .write_formula_with_format(row, ctx.total_hours_col, formula.as_str(), &formats.total)
            .map_err(xlsx_error)?;

        let formula = format!("=SUM({cost}{first}:{cost}{last})");
        sheet
            .write_formula_with_format(row, ctx.total_cost_col, formula.as_str(), &formats.total_currency)
            .map_err(xlsx_error)?;

        Ok(())
    }

    fn write_user(
        &self,
        sheet: &mut Worksheet,
        ctx: &mut LayoutContext,
        formats: &ProjectFormats,
        project: &Project,
        user: &User,
    ) -> Result<(), RenderError> {
        let row = ctx.next_row();
        let excel_row = row + 1;

        sheet
            .write_with_format(row, ctx.name_col, user.name.as_str(), &formats.user_text)
            .map_err(xlsx_error)?;
        sheet
            .write_blank(row, ctx.manager_col, &formats.user_text)
            .map_err(xlsx_error)?;
        sheet
            .write_with_format(row, ctx.position_col, user.position.as_str(), &formats.user_text)
            .map_err(xlsx_error)?;

        sheet
            .write_with_format(row, ctx.rate_col, f64::from(user.rate), &formats.user_currency)
            .map_err(xlsx_error)?;
        flag_zero(sheet, row, ctx.rate_col).map_err(xlsx_error)?;

        let first_date = col_to_letter(ctx.first_date_col);
        let last_date = col_to_letter(ctx.last_date_col);
        let formula = format!("=SUM({first_date}{excel_row}:{last_date}{excel_row})");
        sheet
            .write_formula_with_format(row, ctx.total_hours_col, formula.as_str(), &formats.user_text)
            .map_err(xlsx_error)?;

        let rate = col_to_letter(ctx.rate_col);
        let hours = col_to_letter(ctx.total_hours_col);
        let formula = format!("={rate}{excel_row}*{hours}{excel_row}");
        sheet
            .write_formula_with_format(row, ctx.total_cost_col, formula.as_str(), &formats.user_currency)
            .map_err(xlsx_error)?;

        // seconds are summed per day across issues before converting to hours
        let mut hours_by_col: HashMap<u16, f64> = HashMap::new();
        for (date, seconds) in user.seconds_by_date() {
            let hours = seconds_to_hours(seconds);
            match ctx.date_column(date) {
                Some(col) => {
                    hours_by_col.insert(col, hours);
                }
                None => {
                    warn!(
                        project = %project.key,
                        user = %user.name,
                        %date,
                        hours,
                        "No date column for effort, value skipped"
                    );
                    ctx.skipped.push(SkippedEffort {
                        project: project.key.clone(),
                        user: user.name.clone(),
                        date,
                        hours,
                    });
                }
            }
        }

        for col in ctx.first_date_col..=ctx.last_date_col {
            match hours_by_col.get(&col) {
                Some(hours) => sheet.write_with_format(row, col, *hours, &formats.user_date),
                None => sheet.write_blank(row, col, &formats.user_date),
            }
            .map_err(xlsx_error)?;
        }

        Ok(())
    }
}

impl Renderer for ExcelRenderer {
    type Output = RenderSummary;

    /// Add (or replace) the period sheet in the target workbook and save it
    fn render(&self, report: &Report) -> Result<RenderSummary, RenderError> {
        let existing = ExistingDocument::open(&self.target)?;

        let name = sheet_name(&report.period);
        let replaced_existing = existing.contains(&name);
        if replaced_existing {
            warn!(sheet = %name, target = %self.target.display(), "Replacing existing sheet");
        }

        let (mut sheet, ctx) = self.build_sheet(report)?;
        sheet.set_active(true);

        let mut workbook = Workbook::new();
        workbook.push_worksheet(sheet);
        let period = workbook.save_to_buffer().map_err(xlsx_error)?;
        std::fs::write(&self.target, existing.merge(&period)?)?;

        info!(sheet = %name, target = %self.target.display(), "Report saved");

        Ok(RenderSummary {
            sheet_name: name,
            last_row: ctx.last_row,
            skipped: ctx.skipped,
            replaced_existing,
        })
    }
}
