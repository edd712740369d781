//! Integration tests for the report layout engine, read back with calamine

use std::io::Read;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::NaiveDate;
use costsheet_core::aggregate::{aggregate, ProjectWorklog};
use costsheet_core::{Issue, Period, Project, RawEntry, Renderer, Report, Roster, User};
use costsheet_core::{ProjectConfig, UserConfig};
use costsheet_xlsx::{ExcelRenderer, ExistingDocument};
use pretty_assertions::assert_eq;
use rust_xlsxwriter::Workbook;
use tempfile::tempdir;

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn sheet_names(path: &Path) -> Vec<String> {
    let workbook = open_workbook_auto(path).unwrap();
    workbook.sheet_names()
}

fn read_sheet(path: &Path, name: &str) -> Range<Data> {
    let mut workbook = open_workbook_auto(path).unwrap();
    workbook.worksheet_range(name).unwrap()
}

fn read_formulas(path: &Path, name: &str) -> Range<String> {
    let mut workbook = open_workbook_auto(path).unwrap();
    workbook.worksheet_formula(name).unwrap()
}

fn text(range: &Range<Data>, row: u32, col: u32) -> String {
    match range.get_value((row, col)) {
        Some(Data::String(s)) => s.clone(),
        other => panic!("expected text at ({row}, {col}), got {other:?}"),
    }
}

fn number(range: &Range<Data>, row: u32, col: u32) -> f64 {
    match range.get_value((row, col)) {
        Some(Data::Float(f)) => *f,
        Some(Data::Int(i)) => *i as f64,
        other => panic!("expected number at ({row}, {col}), got {other:?}"),
    }
}

fn is_empty(range: &Range<Data>, row: u32, col: u32) -> bool {
    matches!(range.get_value((row, col)), None | Some(Data::Empty))
}

fn read_part(path: &Path, name: &str) -> String {
    let mut zip = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut part = String::new();
    zip.by_name(name).unwrap().read_to_string(&mut part).unwrap();
    part
}

fn sheet_xml(path: &Path, name: &str) -> String {
    ExistingDocument::open(path).unwrap().sheet_xml(name).unwrap()
}

/// Text between the opening `<tag` and `</tag>`
fn section<'a>(xml: &'a str, tag: &str) -> &'a str {
    let start = xml.find(&format!("<{tag}")).unwrap();
    let end = xml[start..].find(&format!("</{tag}>")).unwrap();
    &xml[start..start + end]
}

fn cell_xfs_count(styles: &str) -> usize {
    let xfs = section(styles, "cellXfs");
    xfs.split("count=\"").nth(1).unwrap().split('"').next().unwrap().parse().unwrap()
}

/// Values of every ` s="N"` cell style attribute
fn style_ids(sheet: &str) -> Vec<usize> {
    sheet
        .split(" s=\"")
        .skip(1)
        .map(|rest| rest.split('"').next().unwrap().parse().unwrap())
        .collect()
}

fn march_report() -> Report {
    let roster = Roster::new(vec![ProjectConfig::new("ABC")
        .display_name("Alpha")
        .owner("Olga")
        .manager("Alice")
        .user("Jane Doe", UserConfig::new("Developer", 40))]);

    let entries = vec![RawEntry::new("u1", "Jane Doe", "ABC-1", date(2024, 3, 5), 7200)];
    aggregate(
        Period::month(2024, 3).unwrap(),
        vec![ProjectWorklog::new("ABC", entries)],
        &roster,
    )
}

#[test]
fn march_report_end_to_end() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    let summary = ExcelRenderer::new(&path).render(&march_report()).unwrap();

    assert_eq!(summary.sheet_name, "March");
    assert!(summary.skipped.is_empty());
    assert!(!summary.replaced_existing);
    assert_eq!(sheet_names(&path), vec!["March".to_string()]);

    let sheet = read_sheet(&path, "March");

    // header
    assert_eq!(text(&sheet, 0, 0), "Name");
    assert_eq!(text(&sheet, 0, 5), "Total Cost");
    assert_eq!(text(&sheet, 0, 6), "03/01");
    assert_eq!(text(&sheet, 0, 36), "03/31");
    assert!(is_empty(&sheet, 0, 37));

    // spacer, then the project total row
    assert!(is_empty(&sheet, 1, 0));
    assert_eq!(text(&sheet, 2, 0), "Alpha");
    assert_eq!(text(&sheet, 2, 1), "Alice");
    assert_eq!(text(&sheet, 2, 2), "Olga");

    // user row
    assert_eq!(text(&sheet, 3, 0), "Jane Doe");
    assert_eq!(text(&sheet, 3, 2), "Developer");
    assert_eq!(number(&sheet, 3, 3), 40.0);
    assert_eq!(number(&sheet, 3, 10), 2.0);
    assert!(is_empty(&sheet, 3, 9));
}

#[test]
fn totals_are_formulas_over_user_rows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    let report = Report {
        period: Period::month(2024, 3).unwrap(),
        projects: vec![Project::new("ABC")
            .user(User::new("u1", "Bob").rate(10))
            .user(User::new("u2", "Jane").rate(20))],
    };
    ExcelRenderer::new(&path).render(&report).unwrap();

    let formulas = read_formulas(&path, "March");
    let formula = |row: u32, col: u32| formulas.get_value((row, col)).cloned().unwrap_or_default();

    assert!(formula(2, 4).contains("SUM(E4:E5)"));
    assert!(formula(2, 5).contains("SUM(F4:F5)"));
    assert!(formula(3, 4).contains("SUM(G4:AK4)"));
    assert!(formula(3, 5).contains("D4*E4"));
    assert!(formula(4, 4).contains("SUM(G5:AK5)"));
}

#[test]
fn project_without_users_gets_literal_totals() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    let report = Report {
        period: Period::month(2024, 3).unwrap(),
        projects: vec![Project::new("ABC")],
    };
    let summary = ExcelRenderer::new(&path).render(&report).unwrap();
    assert_eq!(summary.last_row, 2);

    let sheet = read_sheet(&path, "March");
    assert_eq!(text(&sheet, 2, 0), "ABC");
    assert_eq!(number(&sheet, 2, 4), 0.0);
    assert_eq!(number(&sheet, 2, 5), 0.0);
}

#[test]
fn project_without_manager_renders() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    let user = User::new("u1", "Jane")
        .issue(Issue::new("ABC-1").effort(date(2024, 3, 4), 5400));
    let report = Report {
        period: Period::month(2024, 3).unwrap(),
        projects: vec![Project::new("ABC").user(user)],
    };
    ExcelRenderer::new(&path).render(&report).unwrap();

    let sheet = read_sheet(&path, "March");
    assert_eq!(text(&sheet, 2, 0), "ABC");
    assert_eq!(number(&sheet, 3, 9), 1.5);
}

#[test]
fn same_day_efforts_are_summed_before_rounding() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    // 3 x 1200s = 1h exactly, while 3 x round(0.333) would give 0.99
    let user = User::new("u1", "Jane")
        .issue(Issue::new("ABC-1").effort(date(2024, 3, 4), 1200))
        .issue(Issue::new("ABC-2").effort(date(2024, 3, 4), 1200))
        .issue(Issue::new("ABC-3").effort(date(2024, 3, 4), 1200));
    let report = Report {
        period: Period::month(2024, 3).unwrap(),
        projects: vec![Project::new("ABC").user(user)],
    };
    ExcelRenderer::new(&path).render(&report).unwrap();

    let sheet = read_sheet(&path, "March");
    assert_eq!(number(&sheet, 3, 9), 1.0);
}

#[test]
fn two_month_period_sheet() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    let report = Report {
        period: Period::new(date(2024, 12, 30), date(2025, 1, 2)).unwrap(),
        projects: vec![],
    };
    let summary = ExcelRenderer::new(&path).render(&report).unwrap();

    assert_eq!(summary.sheet_name, "December - January");
    let sheet = read_sheet(&path, "December - January");
    assert_eq!(text(&sheet, 0, 6), "12/30");
    assert_eq!(text(&sheet, 0, 9), "01/02");
}

#[test]
fn existing_sheets_are_carried_over() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    let mut workbook = Workbook::new();
    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes.write(0, 0, "keep me").unwrap();
    notes.write(1, 0, 42).unwrap();
    notes.write_formula(2, 0, "=A2*2").unwrap();
    workbook.save(&path).unwrap();

    let summary = ExcelRenderer::new(&path).render(&march_report()).unwrap();
    assert!(!summary.replaced_existing);

    assert_eq!(sheet_names(&path), vec!["Notes".to_string(), "March".to_string()]);
    let notes = read_sheet(&path, "Notes");
    assert_eq!(text(&notes, 0, 0), "keep me");
    assert_eq!(number(&notes, 1, 0), 42.0);
    let formulas = read_formulas(&path, "Notes");
    assert!(formulas
        .get_value((2, 0))
        .is_some_and(|f| f.contains("A2*2")));
}

#[test]
fn same_period_sheet_is_replaced_in_place() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    let mut workbook = Workbook::new();
    workbook.add_worksheet().set_name("March").unwrap().write(0, 0, "stale").unwrap();
    workbook.add_worksheet().set_name("Notes").unwrap().write(0, 0, "keep me").unwrap();
    workbook.save(&path).unwrap();

    let summary = ExcelRenderer::new(&path).render(&march_report()).unwrap();
    assert!(summary.replaced_existing);

    assert_eq!(sheet_names(&path), vec!["March".to_string(), "Notes".to_string()]);
    let march = read_sheet(&path, "March");
    assert_eq!(text(&march, 0, 0), "Name");
    assert_eq!(text(&march, 3, 0), "Jane Doe");
}

#[test]
fn next_period_is_appended() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");
    let renderer = ExcelRenderer::new(&path);

    renderer.render(&march_report()).unwrap();
    let april = Report {
        period: Period::month(2024, 4).unwrap(),
        projects: vec![],
    };
    renderer.render(&april).unwrap();

    assert_eq!(sheet_names(&path), vec!["March".to_string(), "April".to_string()]);
    assert_eq!(text(&read_sheet(&path, "March"), 3, 0), "Jane Doe");
}

#[test]
fn earlier_period_keeps_its_formatting() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");
    let renderer = ExcelRenderer::new(&path);

    renderer.render(&march_report()).unwrap();
    let before = sheet_xml(&path, "March");
    let xfs_before = cell_xfs_count(&read_part(&path, "xl/styles.xml"));
    for marker in ["<mergeCell ", "<pane ", "<conditionalFormatting ", "<cols>"] {
        assert!(before.contains(marker), "March lacks {marker} after its own run");
    }

    let april = Report {
        period: Period::month(2024, 4).unwrap(),
        projects: vec![Project::new("ABC")
            .display_name("Alpha")
            .owner("Olga")
            .manager("Alice")
            .user(User::new("u1", "Jane Doe").position("Developer").rate(40))],
    };
    let summary = renderer.render(&april).unwrap();
    assert!(!summary.replaced_existing);
    assert_eq!(sheet_names(&path), vec!["March".to_string(), "April".to_string()]);

    let after = sheet_xml(&path, "March");
    for marker in ["<mergeCell ", "<pane ", "<conditionalFormatting ", "<cols>"] {
        assert!(after.contains(marker), "March lost {marker} in the April run");
    }
    assert_eq!(after.matches("<mergeCell ").count(), before.matches("<mergeCell ").count());
    assert_eq!(style_ids(&after), style_ids(&before));
    assert!(!after.contains("tabSelected"));

    // April's styles are appended after March's
    let april_xml = sheet_xml(&path, "April");
    let xfs_after = cell_xfs_count(&read_part(&path, "xl/styles.xml"));
    let april_ids = style_ids(&april_xml);
    assert!(!april_ids.is_empty());
    assert!(april_ids.iter().all(|id| (xfs_before..xfs_after).contains(id)));
    assert!(april_xml.contains("tabSelected=\"1\""));
    assert!(!april_xml.contains("t=\"s\""));

    let march = read_sheet(&path, "March");
    assert_eq!(text(&march, 2, 2), "Olga");
    assert_eq!(number(&march, 3, 10), 2.0);
    let april = read_sheet(&path, "April");
    assert_eq!(text(&april, 0, 6), "04/01");
    assert_eq!(text(&april, 3, 0), "Jane Doe");
    assert_eq!(number(&april, 3, 3), 40.0);
}

#[test]
fn rerun_replaces_a_formatted_sheet() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");
    let renderer = ExcelRenderer::new(&path);

    renderer.render(&march_report()).unwrap();
    renderer
        .render(&Report {
            period: Period::month(2024, 4).unwrap(),
            projects: vec![],
        })
        .unwrap();
    let summary = renderer.render(&march_report()).unwrap();

    assert!(summary.replaced_existing);
    assert_eq!(sheet_names(&path), vec!["March".to_string(), "April".to_string()]);
    let march = sheet_xml(&path, "March");
    assert!(march.contains("tabSelected=\"1\""));
    assert!(march.contains("<mergeCell "));
    assert!(!sheet_xml(&path, "April").contains("tabSelected"));
    let workbook = read_part(&path, "xl/workbook.xml");
    assert!(workbook.contains("activeTab=\"0\""));
    assert_eq!(text(&read_sheet(&path, "March"), 2, 2), "Olga");
}

#[test]
fn sheet_freezes_fixed_columns_and_flags_zero_rates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    ExcelRenderer::new(&path).render(&march_report()).unwrap();
    let sheet = sheet_xml(&path, "March");

    let pane = section(&sheet, "sheetView");
    assert!(pane.contains("<pane xSplit=\"6\" ySplit=\"1\""));
    assert!(pane.contains("state=\"frozen\""));

    // the only user row is row 4; its rate sits in column D
    let rule = section(&sheet, "conditionalFormatting");
    assert!(rule.contains("sqref=\"D4\""));
    assert!(rule.contains("operator=\"equal\""));
    assert!(rule.contains("<formula>0</formula>"));
    assert_eq!(sheet.matches("<conditionalFormatting ").count(), 1);
}

#[test]
fn weekend_and_project_fills_are_written() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    ExcelRenderer::new(&path).render(&march_report()).unwrap();
    let styles = read_part(&path, "xl/styles.xml");
    let fills = section(&styles, "fills");

    assert!(fills.contains("FFFEC7CE"), "weekend header fill");
    assert!(fills.contains("FF3FAAB2"), "total row fill, palette color shaded 10%");
    assert!(fills.contains("FF46BDC6"), "user row fill, palette color");
    assert!(section(&styles, "borders").contains("FF3BA0A8"), "borders shaded 15%");
}

#[test]
fn project_without_manager_is_unstyled() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Report.xlsx");

    let report = Report {
        period: Period::month(2024, 3).unwrap(),
        projects: vec![Project::new("ABC").user(User::new("u1", "Jane").rate(10))],
    };
    ExcelRenderer::new(&path).render(&report).unwrap();
    let styles = read_part(&path, "xl/styles.xml");

    assert!(!section(&styles, "fills").contains("FF46BDC6"));
    assert!(!section(&styles, "fills").contains("FF3FAAB2"));
    assert!(!section(&styles, "borders").contains("FF3BA0A8"));
}
