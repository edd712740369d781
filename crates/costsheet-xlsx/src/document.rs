//! Existing report documents.
//!
//! rust_xlsxwriter only writes whole new files. The period sheet is therefore
//! rendered into a one-sheet package of its own and spliced into the existing
//! report at the package level:
//!
//! - sheets already in the target keep their XML, so styles, widths, merges,
//!   panes and conditional formats survive later runs
//! - the stylesheet of the period package is appended to the target stylesheet
//!   and the cell style indices of the new sheet are shifted to match
//! - shared strings of the new sheet become inline strings
//! - a sheet with the same name as the period sheet is replaced in place,
//!   otherwise the new sheet is appended
//! - the period sheet becomes the active tab

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};
use std::path::Path;

use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use costsheet_core::RenderError;

use crate::xml::{self, Element, Node};

const CONTENT_TYPES: &str = "[Content_Types].xml";
const ROOT_RELS: &str = "_rels/.rels";
const DEFAULT_WORKBOOK: &str = "xl/workbook.xml";

const WORKSHEET_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const WORKSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";

/// First id available to custom number formats
const FIRST_CUSTOM_NUM_FMT: u32 = 164;

/// Stylesheet children in schema order
const STYLE_SECTIONS: [&str; 11] = [
    "numFmts",
    "fonts",
    "fills",
    "borders",
    "cellStyleXfs",
    "cellXfs",
    "cellStyles",
    "dxfs",
    "tableStyles",
    "colors",
    "extLst",
];

fn zip_error(e: zip::result::ZipError) -> RenderError {
    RenderError::Format(format!("xlsx package error: {e}"))
}

fn missing_part(name: &str) -> RenderError {
    RenderError::Format(format!("xlsx package has no part {name}"))
}

/// Part name of a relationship target, relative to `base_dir`
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Relationship target for `part` from a part living in `base_dir`
fn relative_target(base_dir: &str, part: &str) -> String {
    match part.strip_prefix(base_dir).and_then(|p| p.strip_prefix('/')) {
        Some(relative) if !base_dir.is_empty() => relative.to_string(),
        _ => format!("/{part}"),
    }
}

fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`
fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// `r:id` or whichever prefix the document binds to the relationships namespace
fn relationship_id(element: &Element) -> Option<(&str, &str)> {
    element
        .attrs
        .iter()
        .find(|(k, _)| k.ends_with(":id"))
        .map(|(k, v)| (k.as_str(), v.as_str()))
}

fn is_sheet(element: &Element) -> bool {
    element.local_name() == "sheet"
}

/// Zip parts by name
#[derive(Clone, Debug, Default)]
struct Package {
    parts: BTreeMap<String, Vec<u8>>,
}

impl Package {
    fn from_bytes(bytes: &[u8]) -> Result<Self, RenderError> {
        let mut zip = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
        let mut parts = BTreeMap::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).map_err(zip_error)?;
            if !file.is_file() {
                continue;
            }
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            parts.insert(file.name().to_string(), buf);
        }
        Ok(Self { parts })
    }

    fn to_bytes(&self) -> Result<Vec<u8>, RenderError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

        // content types first, as Excel writes them
        let ordered = self.parts.get_key_value(CONTENT_TYPES).into_iter().chain(
            self.parts
                .iter()
                .filter(|(name, _)| name.as_str() != CONTENT_TYPES),
        );
        for (name, bytes) in ordered {
            zip.start_file(name.as_str(), options).map_err(zip_error)?;
            zip.write_all(bytes)?;
        }
        Ok(zip.finish().map_err(zip_error)?.into_inner())
    }

    fn xml(&self, name: &str) -> Result<Element, RenderError> {
        let bytes = self.parts.get(name).ok_or_else(|| missing_part(name))?;
        xml::parse(bytes)
    }

    fn set_xml(&mut self, name: &str, root: &Element) -> Result<(), RenderError> {
        self.parts.insert(name.to_string(), xml::write(root)?);
        Ok(())
    }

    fn workbook_path(&self) -> String {
        let Ok(rels) = self.xml(ROOT_RELS) else {
            return DEFAULT_WORKBOOK.to_string();
        };
        let target = rels
            .elements()
            .find(|r| r.attr("Type").is_some_and(|t| t.ends_with("/officeDocument")))
            .and_then(|r| r.attr("Target"))
            .map(|t| resolve_target("", t));
        target.unwrap_or_else(|| DEFAULT_WORKBOOK.to_string())
    }
}

#[derive(Clone, Debug)]
struct SheetEntry {
    name: String,
    part: String,
}

/// Where the workbook parts of a package live
#[derive(Clone, Debug)]
struct WorkbookParts {
    path: String,
    rels_path: String,
    sheets: Vec<SheetEntry>,
    styles: Option<String>,
    shared_strings: Option<String>,
}

impl WorkbookParts {
    fn read(package: &Package) -> Result<Self, RenderError> {
        let path = package.workbook_path();
        let rels_path = rels_path(&path);
        let dir = part_dir(&path);

        let mut targets = HashMap::new();
        let mut styles = None;
        let mut shared_strings = None;
        for rel in package.xml(&rels_path)?.elements() {
            if rel.attr("TargetMode") == Some("External") {
                continue;
            }
            let (Some(id), Some(target), Some(kind)) =
                (rel.attr("Id"), rel.attr("Target"), rel.attr("Type"))
            else {
                continue;
            };
            let part = resolve_target(dir, target);
            if kind.ends_with("/styles") {
                styles = Some(part.clone());
            } else if kind.ends_with("/sharedStrings") {
                shared_strings = Some(part.clone());
            }
            targets.insert(id.to_string(), part);
        }

        let workbook = package.xml(&path)?;
        let sheets = workbook
            .child("sheets")
            .map(|sheets| {
                sheets
                    .elements()
                    .filter(|e| is_sheet(e))
                    .filter_map(|e| {
                        let name = e.attr("name")?;
                        let (_, id) = relationship_id(e)?;
                        let part = targets.get(id)?;
                        Some(SheetEntry {
                            name: name.to_string(),
                            part: part.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            path,
            rels_path,
            sheets,
            styles,
            shared_strings,
        })
    }

    fn find(&self, name: &str) -> Option<&SheetEntry> {
        self.sheets
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Index shifts for cell formats and differential formats of the new sheet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct StyleShift {
    xf: u32,
    dxf: u32,
}

fn shift_attr(element: &mut Element, key: &str, offset: u32) {
    if let Some(value) = element.attr(key).and_then(|v| v.parse::<u32>().ok()) {
        element.set_attr(key, (value + offset).to_string());
    }
}

/// Stylesheet section `name`, created empty at its schema position when absent
fn ensure_section<'a>(root: &'a mut Element, name: &str) -> Result<&'a mut Element, RenderError> {
    if root.child(name).is_none() {
        let rank = |local: &str| STYLE_SECTIONS.iter().position(|s| *s == local);
        let own = rank(name);
        let position = root
            .children
            .iter()
            .position(|node| match node {
                Node::Element(e) => matches!((rank(e.local_name()), own), (Some(r), Some(o)) if r > o),
                Node::Text(_) => false,
            })
            .unwrap_or(root.children.len());
        let section = Element::new(root.sibling_name(name)).with_attr("count", "0");
        root.children.insert(position, Node::Element(section));
    }
    root.child_mut(name)
        .ok_or_else(|| RenderError::Format(format!("stylesheet has no {name} section")))
}

fn update_count(section: &mut Element) {
    let count = section.elements().count();
    section.set_attr("count", count.to_string());
}

/// Append every entry of `source`'s `name` section to `target`'s, returning the
/// index the first appended entry got
fn append_section(
    source: &Element,
    target: &mut Element,
    name: &str,
    mut adjust: impl FnMut(&mut Element),
) -> Result<u32, RenderError> {
    let entries: Vec<Element> = source
        .child(name)
        .map(|s| s.elements().cloned().collect())
        .unwrap_or_default();

    let section = ensure_section(target, name)?;
    let offset = u32::try_from(section.elements().count())
        .map_err(|_| RenderError::Format(format!("too many {name} entries")))?;
    for mut entry in entries {
        adjust(&mut entry);
        section.push(entry);
    }
    update_count(section);
    Ok(offset)
}

/// Custom number formats of `source` mapped onto `target`, reusing equal format
/// codes and allocating fresh ids for the rest
fn merge_num_fmts(source: &Element, target: &mut Element) -> Result<HashMap<u32, u32>, RenderError> {
    let formats = |root: &Element| -> Vec<(u32, String)> {
        root.child("numFmts")
            .map(|s| {
                s.elements()
                    .filter_map(|f| {
                        let id = f.attr("numFmtId")?.parse().ok()?;
                        Some((id, f.attr("formatCode")?.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let wanted: Vec<(u32, String)> = formats(source)
        .into_iter()
        .filter(|(id, _)| *id >= FIRST_CUSTOM_NUM_FMT)
        .collect();
    if wanted.is_empty() {
        return Ok(HashMap::new());
    }

    let existing = formats(target);
    let mut next_id = existing
        .iter()
        .map(|(id, _)| id + 1)
        .max()
        .unwrap_or(FIRST_CUSTOM_NUM_FMT)
        .max(FIRST_CUSTOM_NUM_FMT);

    let section = ensure_section(target, "numFmts")?;
    let tag = section.sibling_name("numFmt");
    let mut map = HashMap::new();
    for (id, code) in wanted {
        if let Some((existing_id, _)) = existing.iter().find(|(_, c)| *c == code) {
            map.insert(id, *existing_id);
            continue;
        }
        section.push(
            Element::new(tag.as_str())
                .with_attr("numFmtId", next_id.to_string())
                .with_attr("formatCode", code),
        );
        map.insert(id, next_id);
        next_id += 1;
    }
    update_count(section);
    Ok(map)
}

/// Append the styles of `source` to `target`
fn merge_styles(source: &Element, target: &mut Element) -> Result<StyleShift, RenderError> {
    let num_fmts = merge_num_fmts(source, target)?;
    let remap_num_fmt = |element: &mut Element| {
        let mapped = element
            .attr("numFmtId")
            .and_then(|v| v.parse::<u32>().ok())
            .and_then(|id| num_fmts.get(&id));
        if let Some(id) = mapped {
            element.set_attr("numFmtId", id.to_string());
        }
    };

    let font = append_section(source, target, "fonts", |_| {})?;
    let fill = append_section(source, target, "fills", |_| {})?;
    let border = append_section(source, target, "borders", |_| {})?;

    let xf = append_section(source, target, "cellXfs", |xf| {
        shift_attr(xf, "fontId", font);
        shift_attr(xf, "fillId", fill);
        shift_attr(xf, "borderId", border);
        remap_num_fmt(xf);
        xf.set_attr("xfId", "0");
    })?;

    let dxf = append_section(source, target, "dxfs", |dxf| {
        for child in dxf.elements_mut().filter(|c| c.local_name() == "numFmt") {
            remap_num_fmt(child);
        }
    })?;

    Ok(StyleShift { xf, dxf })
}

fn read_shared_strings(sst: &Element) -> Vec<String> {
    sst.elements()
        .filter(|e| e.local_name() == "si")
        .map(|si| {
            si.elements()
                .filter_map(|part| match part.local_name() {
                    "t" => Some(part.text()),
                    "r" => part.child("t").map(Element::text),
                    _ => None,
                })
                .collect()
        })
        .collect()
}

fn localize_cell(cell: &mut Element, strings: &[String], shift: StyleShift) -> Result<(), RenderError> {
    shift_attr(cell, "s", shift.xf);
    if cell.attr("t") != Some("s") {
        return Ok(());
    }

    let text = cell
        .child("v")
        .and_then(|v| v.text().trim().parse::<usize>().ok())
        .and_then(|i| strings.get(i))
        .cloned()
        .ok_or_else(|| {
            RenderError::InvalidData(format!(
                "cell {} refers to a missing shared string",
                cell.attr("r").unwrap_or("?")
            ))
        })?;

    let mut t = Element::new(cell.sibling_name("t")).with_attr("xml:space", "preserve");
    t.children.push(Node::Text(text));
    let mut inline = Element::new(cell.sibling_name("is"));
    inline.push(t);

    cell.set_attr("t", "inlineStr");
    cell.children.clear();
    cell.push(inline);
    Ok(())
}

/// Rewrite a worksheet from the period package so it stands alone in the target
fn localize_sheet(sheet: &mut Element, strings: &[String], shift: StyleShift) -> Result<(), RenderError> {
    for child in sheet.elements_mut() {
        let kind = child.local_name().to_string();
        match kind.as_str() {
            "sheetData" => {
                for row in child.elements_mut() {
                    shift_attr(row, "s", shift.xf);
                    for cell in row.elements_mut() {
                        localize_cell(cell, strings, shift)?;
                    }
                }
            }
            "cols" => {
                for col in child.elements_mut() {
                    shift_attr(col, "style", shift.xf);
                }
            }
            "conditionalFormatting" => {
                for rule in child.elements_mut() {
                    shift_attr(rule, "dxfId", shift.dxf);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Register a new worksheet part and its `<sheet>` entry, returning the part name
fn append_sheet(
    target: &mut Package,
    book: &WorkbookParts,
    workbook: &mut Element,
    name: &str,
) -> Result<String, RenderError> {
    let mut n = book.sheets.len() + 1;
    let part = loop {
        let candidate = format!("xl/worksheets/sheet{n}.xml");
        if !target.parts.contains_key(&candidate) {
            break candidate;
        }
        n += 1;
    };

    let mut rels = target.xml(&book.rels_path)?;
    let mut id = rels.elements().count() + 1;
    let rel_id = loop {
        let candidate = format!("rId{id}");
        if !rels.elements().any(|r| r.attr("Id") == Some(candidate.as_str())) {
            break candidate;
        }
        id += 1;
    };
    let relationship = Element::new(rels.sibling_name("Relationship"))
        .with_attr("Id", rel_id.as_str())
        .with_attr("Type", WORKSHEET_REL)
        .with_attr("Target", relative_target(part_dir(&book.path), &part));
    rels.push(relationship);
    target.set_xml(&book.rels_path, &rels)?;

    let mut types = target.xml(CONTENT_TYPES)?;
    let content_type = Element::new(types.sibling_name("Override"))
        .with_attr("PartName", format!("/{part}"))
        .with_attr("ContentType", WORKSHEET_CONTENT_TYPE);
    types.push(content_type);
    target.set_xml(CONTENT_TYPES, &types)?;

    let sheets = workbook
        .child_mut("sheets")
        .ok_or_else(|| RenderError::Format("workbook has no sheets element".into()))?;
    let id_key = sheets
        .elements()
        .find_map(relationship_id)
        .map_or_else(|| "r:id".to_string(), |(key, _)| key.to_string());
    let sheet_id = sheets
        .elements()
        .filter_map(|e| e.attr("sheetId")?.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
        + 1;
    let entry = Element::new(sheets.sibling_name("sheet"))
        .with_attr("name", name)
        .with_attr("sheetId", sheet_id.to_string())
        .with_attr(id_key, rel_id);
    sheets.push(entry);

    Ok(part)
}

fn set_active_tab(workbook: &mut Element, name: &str) {
    let index = workbook
        .child("sheets")
        .and_then(|sheets| {
            sheets
                .elements()
                .filter(|e| is_sheet(e))
                .position(|e| e.attr("name").is_some_and(|n| n.eq_ignore_ascii_case(name)))
        })
        .unwrap_or(0);

    if let Some(view) = workbook
        .child_mut("bookViews")
        .and_then(|views| views.child_mut("workbookView"))
    {
        view.set_attr("activeTab", index.to_string());
        if view
            .attr("firstSheet")
            .and_then(|v| v.parse::<usize>().ok())
            .is_some_and(|first| first > index)
        {
            view.remove_attr("firstSheet");
        }
    }
}

/// Only the active tab may be selected
fn clear_tab_selection(target: &mut Package, part: &str) -> Result<(), RenderError> {
    let selected = target
        .parts
        .get(part)
        .is_some_and(|bytes| bytes.windows(b"tabSelected".len()).any(|w| w == b"tabSelected"));
    if !selected {
        return Ok(());
    }

    let mut sheet = target.xml(part)?;
    if let Some(views) = sheet.child_mut("sheetViews") {
        for view in views.elements_mut() {
            view.remove_attr("tabSelected");
        }
    }
    target.set_xml(part, &sheet)
}

/// Cached calculation order goes stale once a sheet changes; Excel rebuilds it
fn drop_calc_chain(target: &mut Package, book: &WorkbookParts) -> Result<(), RenderError> {
    let mut rels = target.xml(&book.rels_path)?;
    let is_calc_chain =
        |r: &Element| r.attr("Type").is_some_and(|t| t.ends_with("/calcChain"));
    let parts: Vec<String> = rels
        .elements()
        .filter(|r| is_calc_chain(r))
        .filter_map(|r| r.attr("Target"))
        .map(|t| resolve_target(part_dir(&book.path), t))
        .collect();
    if parts.is_empty() {
        return Ok(());
    }

    rels.retain_elements(|r| !is_calc_chain(r));
    target.set_xml(&book.rels_path, &rels)?;

    let mut types = target.xml(CONTENT_TYPES)?;
    types.retain_elements(|o| {
        !o.attr("PartName")
            .is_some_and(|p| parts.iter().any(|part| p.strip_prefix('/') == Some(part.as_str())))
    });
    target.set_xml(CONTENT_TYPES, &types)?;

    for part in parts {
        target.parts.remove(&part);
    }
    Ok(())
}

/// The target document as it was before this run
#[derive(Clone, Debug, Default)]
pub struct ExistingDocument {
    package: Option<Package>,
    sheets: Vec<SheetEntry>,
}

impl ExistingDocument {
    /// Read `path`; a missing file yields an empty document
    pub fn open(path: &Path) -> Result<Self, RenderError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let bytes = std::fs::read(path)?;
        let package = Package::from_bytes(&bytes).map_err(|e| {
            RenderError::Format(format!("Failed to open {}: {e}", path.display()))
        })?;
        let book = WorkbookParts::read(&package)?;
        debug!(path = %path.display(), sheets = book.sheets.len(), "Existing report opened");

        Ok(Self {
            package: Some(package),
            sheets: book.sheets,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.package.is_none()
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Sheet names compare case-insensitively, as in Excel
    pub fn contains(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Raw worksheet XML of sheet `name`
    pub fn sheet_xml(&self, name: &str) -> Option<String> {
        let entry = self.sheets.iter().find(|s| s.name.eq_ignore_ascii_case(name))?;
        let bytes = self.package.as_ref()?.parts.get(&entry.part)?;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Splice the single sheet of the `period` package into this document and
    /// return the resulting package bytes. An empty document yields `period`
    /// unchanged.
    pub fn merge(self, period: &[u8]) -> Result<Vec<u8>, RenderError> {
        let Some(mut target) = self.package else {
            return Ok(period.to_vec());
        };

        let source = Package::from_bytes(period)?;
        let source_book = WorkbookParts::read(&source)?;
        let [period_sheet] = source_book.sheets.as_slice() else {
            return Err(RenderError::InvalidData(format!(
                "period workbook has {} sheets, expected one",
                source_book.sheets.len()
            )));
        };
        let name = period_sheet.name.as_str();
        let target_book = WorkbookParts::read(&target)?;

        let strings = match &source_book.shared_strings {
            Some(part) => read_shared_strings(&source.xml(part)?),
            None => Vec::new(),
        };

        let (Some(source_styles), Some(target_styles)) = (&source_book.styles, &target_book.styles)
        else {
            return Err(RenderError::Format("workbook has no stylesheet".into()));
        };
        let mut stylesheet = target.xml(target_styles)?;
        let shift = merge_styles(&source.xml(source_styles)?, &mut stylesheet)?;
        target.set_xml(target_styles, &stylesheet)?;

        let mut sheet = source.xml(&period_sheet.part)?;
        localize_sheet(&mut sheet, &strings, shift)?;

        let mut workbook = target.xml(&target_book.path)?;
        let part = match target_book.find(name) {
            Some(existing) => {
                debug!(sheet = name, part = %existing.part, "Replacing sheet in place");
                // the replaced sheet's drawings, comments and the like go with it
                target.parts.remove(&rels_path(&existing.part));
                existing.part.clone()
            }
            None => {
                let part = append_sheet(&mut target, &target_book, &mut workbook, name)?;
                debug!(sheet = name, part = %part, "Appending sheet");
                part
            }
        };
        target.set_xml(&part, &sheet)?;

        set_active_tab(&mut workbook, name);
        target.set_xml(&target_book.path, &workbook)?;
        for other in target_book.sheets.iter().filter(|s| s.part != part) {
            clear_tab_selection(&mut target, &other.part)?;
        }
        drop_calc_chain(&mut target, &target_book)?;

        target.to_bytes()
    }
}
