//! Formats shared by the report and roster workbooks

use rust_xlsxwriter::{
    ConditionalFormatCell, ConditionalFormatCellRule, Format, FormatBorder, Worksheet, XlsxError,
};

use costsheet_core::RenderError;

/// Default number format for rate and cost cells
pub const DEFAULT_CURRENCY_FORMAT: &str = "#,##0.00";

const ZERO_FLAG_FONT: u32 = 0x9A0511;
const ZERO_FLAG_FILL: u32 = 0xFEC7CE;

/// Light red used for weekend header cells
pub const WEEKEND_FILL: u32 = 0xFEC7CE;

/// Conditional rule flagging a cell whose value is 0 (red font on pink fill).
///
/// Applied to every rate cell so a missing rate stands out.
pub fn zero_flag_rule() -> ConditionalFormatCell {
    let flagged = Format::new()
        .set_font_color(ZERO_FLAG_FONT)
        .set_background_color(ZERO_FLAG_FILL);

    ConditionalFormatCell::new()
        .set_rule(ConditionalFormatCellRule::EqualTo(0))
        .set_format(flagged)
}

/// Attach [`zero_flag_rule`] to a single cell
pub fn flag_zero(sheet: &mut Worksheet, row: u32, col: u16) -> Result<(), XlsxError> {
    sheet.add_conditional_format(row, col, row, col, &zero_flag_rule())?;
    Ok(())
}

/// Thin border on all four sides in one color
pub fn thin_border(format: Format, color: u32) -> Format {
    format
        .set_border(FormatBorder::Thin)
        .set_border_color(color)
}

/// Map a writer error into the rendering error
pub(crate) fn xlsx_error(e: XlsxError) -> RenderError {
    RenderError::Format(e.to_string())
}

/// Convert column number to Excel letter (0 -> A, 25 -> Z, 26 -> AA)
pub fn col_to_letter(col: u16) -> String {
    let mut result = String::new();
    let mut n = col as u32;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// A1-style reference from zero-based row and column
pub fn cell_ref(row: u32, col: u16) -> String {
    format!("{}{}", col_to_letter(col), row + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn col_to_letter_works() {
        assert_eq!(col_to_letter(0), "A");
        assert_eq!(col_to_letter(5), "F");
        assert_eq!(col_to_letter(25), "Z");
        assert_eq!(col_to_letter(26), "AA");
        assert_eq!(col_to_letter(36), "AK");
        assert_eq!(col_to_letter(52), "BA");
    }

    #[test]
    fn cell_ref_is_one_based() {
        assert_eq!(cell_ref(0, 0), "A1");
        assert_eq!(cell_ref(9, 4), "E10");
    }
}
