//! Report emission: renders a consolidation result into PDF, XLSX, or CSV.
//!
//! All three formats carry the same content: a title, a generation summary
//! (date, totals, processing counts), and the consolidated product table.

use anyhow::{Context, Result};
use tracing::info;

use crate::schema::{ConsolidatedProduct, ConsolidationResult};

/// Requested report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Pdf,
    Xlsx,
    Csv,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "xlsx" | "excel" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }
}

const TITLE: &str = "PEDIDO DE COMPRA CONSOLIDADO";
const HEADERS: [&str; 7] = [
    "Código",
    "Referência",
    "Descrição",
    "Quantidade",
    "Valor Unitário",
    "Valor Total",
    "Fonte",
];

/// Render a result in the requested format.
pub fn render(result: &ConsolidationResult, format: ReportFormat) -> Result<Vec<u8>> {
    let bytes = match format {
        ReportFormat::Csv => render_csv(result)?,
        ReportFormat::Xlsx => render_xlsx(result)?,
        ReportFormat::Pdf => render_pdf(result)?,
    };
    info!(
        "Report generated: {} ({} bytes, {} products)",
        format.extension(),
        bytes.len(),
        result.total_products
    );
    Ok(bytes)
}

/// Format a value as Brazilian currency: 1234.5 → "R$ 1.234,50".
pub fn format_currency(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (int_part, dec_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    format!("R$ {}{},{}", sign, grouped, dec_part)
}

fn sources_display(product: &ConsolidatedProduct) -> String {
    product.sources.join(", ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

// ============================================================================
// CSV
// ============================================================================

fn render_csv(result: &ConsolidationResult) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    writer.write_record([TITLE])?;
    writer.write_record([""])?;
    writer.write_record(["Data de Geração:", &now_display_timestamp()])?;
    writer.write_record(["Total de Produtos:", &result.total_products.to_string()])?;
    writer.write_record(["Valor Total:", &format_currency(result.total_value)])?;
    writer.write_record([
        "Arquivos Processados:",
        &result.processing_info.processed_files.to_string(),
    ])?;
    writer.write_record([
        "Produtos Extraídos:",
        &result.processing_info.extracted_products.to_string(),
    ])?;
    writer.write_record([""])?;

    writer.write_record(HEADERS)?;
    for product in &result.products {
        writer.write_record([
            product.code.as_deref().unwrap_or("-"),
            product.reference.as_deref().unwrap_or("-"),
            &product.description,
            &format!("{}", product.quantity),
            &format!("{:.2}", product.unit_value),
            &format!("{:.2}", product.total_value),
            &sources_display(product),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to finalize CSV buffer: {}", e))
}

// ============================================================================
// XLSX
// ============================================================================

fn render_xlsx(result: &ConsolidationResult) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook};

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Pedido de Compra")?;

    let title_format = Format::new()
        .set_bold()
        .set_font_size(16)
        .set_align(FormatAlign::Center);
    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(0x366092))
        .set_align(FormatAlign::Center);

    worksheet.merge_range(0, 0, 0, 6, TITLE, &title_format)?;

    worksheet.write_string(2, 0, "Data de Geração:")?;
    worksheet.write_string(2, 1, now_display_timestamp())?;
    worksheet.write_string(3, 0, "Total de Produtos:")?;
    worksheet.write_number(3, 1, result.total_products as f64)?;
    worksheet.write_string(4, 0, "Valor Total:")?;
    worksheet.write_string(4, 1, format_currency(result.total_value))?;
    worksheet.write_string(5, 0, "Arquivos Processados:")?;
    worksheet.write_number(5, 1, result.processing_info.processed_files as f64)?;
    worksheet.write_string(6, 0, "Produtos Extraídos:")?;
    worksheet.write_number(6, 1, result.processing_info.extracted_products as f64)?;

    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(8, col as u16, *header, &header_format)?;
    }

    for (i, product) in result.products.iter().enumerate() {
        let row = 9 + i as u32;
        worksheet.write_string(row, 0, product.code.as_deref().unwrap_or("-"))?;
        worksheet.write_string(row, 1, product.reference.as_deref().unwrap_or("-"))?;
        worksheet.write_string(row, 2, &product.description)?;
        worksheet.write_number(row, 3, product.quantity)?;
        worksheet.write_number(row, 4, product.unit_value)?;
        worksheet.write_number(row, 5, product.total_value)?;
        worksheet.write_string(row, 6, sources_display(product))?;
    }

    for (col, width) in [15.0, 15.0, 40.0, 12.0, 15.0, 15.0, 25.0].into_iter().enumerate() {
        worksheet.set_column_width(col as u16, width)?;
    }

    Ok(workbook.save_to_buffer()?)
}

// ============================================================================
// PDF
// ============================================================================

const PAGE_WIDTH: i64 = 595; // A4
const PAGE_HEIGHT: i64 = 842;
const ROWS_PER_PAGE: usize = 40;

struct PdfLine {
    x: i64,
    y: i64,
    size: i64,
    bold: bool,
    text: String,
}

fn render_pdf(result: &ConsolidationResult) -> Result<Vec<u8>> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream, StringFormat};

    // Column x-positions for the product table.
    const COLS: [i64; 7] = [40, 100, 160, 360, 400, 460, 520];

    let mut pages: Vec<Vec<PdfLine>> = Vec::new();
    let mut current: Vec<PdfLine> = Vec::new();
    let mut y = PAGE_HEIGHT - 60;

    // Title and summary on the first page.
    current.push(PdfLine {
        x: 170,
        y,
        size: 16,
        bold: true,
        text: TITLE.to_string(),
    });
    y -= 40;

    let info = &result.processing_info;
    let summary = [
        format!("Data de Geração: {}", now_display_timestamp()),
        format!("Total de Produtos: {}", result.total_products),
        format!("Valor Total: {}", format_currency(result.total_value)),
        format!("Arquivos Processados: {}", info.processed_files),
        format!("Produtos Extraídos: {}", info.extracted_products),
    ];
    for line in summary {
        current.push(PdfLine { x: 40, y, size: 10, bold: false, text: line });
        y -= 16;
    }
    y -= 20;

    // Table header + rows, paginated.
    let push_header = |lines: &mut Vec<PdfLine>, y: i64| {
        for (i, header) in HEADERS.iter().enumerate() {
            lines.push(PdfLine {
                x: COLS[i],
                y,
                size: 8,
                bold: true,
                text: header.to_string(),
            });
        }
    };

    push_header(&mut current, y);
    y -= 14;

    let mut rows_on_page = 0;
    for product in &result.products {
        if rows_on_page >= ROWS_PER_PAGE {
            pages.push(std::mem::take(&mut current));
            y = PAGE_HEIGHT - 60;
            push_header(&mut current, y);
            y -= 14;
            rows_on_page = 0;
        }

        let cells = [
            truncate(product.code.as_deref().unwrap_or("-"), 10),
            truncate(product.reference.as_deref().unwrap_or("-"), 10),
            truncate(&product.description, 38),
            format!("{}", product.quantity),
            format!("{:.2}", product.unit_value),
            format!("{:.2}", product.total_value),
            truncate(&sources_display(product), 14),
        ];
        for (i, cell) in cells.into_iter().enumerate() {
            current.push(PdfLine { x: COLS[i], y, size: 8, bold: false, text: cell });
        }
        y -= 12;
        rows_on_page += 1;
    }
    pages.push(current);

    // Assemble the document.
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => regular_id, "F2" => bold_id },
    });

    let mut page_ids = Vec::new();
    for lines in &pages {
        let mut operations = Vec::new();
        for line in lines {
            let font = if line.bold { "F2" } else { "F1" };
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec![font.into(), line.size.into()]));
            operations.push(Operation::new("Td", vec![line.x.into(), line.y.into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(latin1_bytes(&line.text), StringFormat::Literal)],
            ));
            operations.push(Operation::new("ET", vec![]));
        }

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("Failed to encode PDF content stream")?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .context("Failed to serialize PDF")?;
    Ok(buffer)
}

/// Encode text as WinAnsi (Latin-1) bytes for PDF literal strings;
/// unmappable characters degrade to '?'.
fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if code <= 0xFF {
                code as u8
            } else {
                b'?'
            }
        })
        .collect()
}

/// Current local-less timestamp as "DD/MM/YYYY HH:MM:SS" (UTC).
fn now_display_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let days_since_epoch = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let mut year = 1970i64;
    let mut remaining_days = days_since_epoch as i64;
    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 1;
    for days in days_in_months {
        if remaining_days < days {
            break;
        }
        remaining_days -= days;
        month += 1;
    }
    let day = remaining_days + 1;

    format!(
        "{:02}/{:02}/{:04} {:02}:{:02}:{:02}",
        day, month, year, hours, minutes, seconds
    )
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProcessingInfo;

    fn sample_result() -> ConsolidationResult {
        ConsolidationResult {
            products: vec![
                ConsolidatedProduct {
                    code: Some("TA-2030".to_string()),
                    reference: None,
                    description: "Tinta Acrílica".to_string(),
                    quantity: 15.0,
                    unit_value: 89.9,
                    total_value: 1348.5,
                    sources: vec!["pedido1.pdf".to_string(), "pedido2.pdf".to_string()],
                },
                ConsolidatedProduct {
                    code: None,
                    reference: Some("RF-1".to_string()),
                    description: "Caneta".to_string(),
                    quantity: 15.0,
                    unit_value: 2.5,
                    total_value: 32.5,
                    sources: vec!["pedido1.pdf".to_string()],
                },
            ],
            total_products: 2,
            total_value: 1381.0,
            processing_info: ProcessingInfo {
                processed_files: 2,
                failed_files: Vec::new(),
                extracted_products: 3,
                skipped_records: 0,
            },
        }
    }

    #[test]
    fn format_parsing() {
        assert_eq!(ReportFormat::from_str("pdf"), Some(ReportFormat::Pdf));
        assert_eq!(ReportFormat::from_str("xlsx"), Some(ReportFormat::Xlsx));
        // The original UI calls the format "excel".
        assert_eq!(ReportFormat::from_str("excel"), Some(ReportFormat::Xlsx));
        assert_eq!(ReportFormat::from_str("csv"), Some(ReportFormat::Csv));
        assert_eq!(ReportFormat::from_str("docx"), None);
    }

    #[test]
    fn currency_formatting() {
        assert_eq!(format_currency(0.0), "R$ 0,00");
        assert_eq!(format_currency(2.5), "R$ 2,50");
        assert_eq!(format_currency(1234.5), "R$ 1.234,50");
        assert_eq!(format_currency(1234567.89), "R$ 1.234.567,89");
        assert_eq!(format_currency(-12.0), "R$ -12,00");
    }

    #[test]
    fn csv_contains_summary_and_rows() {
        let bytes = render(&sample_result(), ReportFormat::Csv).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(TITLE));
        assert!(text.contains("Total de Produtos:,2"));
        assert!(text.contains("Tinta Acrílica"));
        assert!(text.contains("pedido1.pdf"));
        assert!(text.contains("Caneta"));
    }

    #[test]
    fn xlsx_is_a_zip_container() {
        let bytes = render(&sample_result(), ReportFormat::Xlsx).unwrap();
        // XLSX files are ZIP archives: PK magic.
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn pdf_loads_and_paginates() {
        let mut result = sample_result();
        // Enough rows to force a second page.
        for i in 0..60 {
            result.products.push(ConsolidatedProduct {
                code: None,
                reference: None,
                description: format!("Produto {}", i),
                quantity: 1.0,
                unit_value: 1.0,
                total_value: 1.0,
                sources: vec!["a.pdf".to_string()],
            });
        }
        result.total_products = result.products.len();

        let bytes = render(&result, ReportFormat::Pdf).unwrap();
        assert_eq!(&bytes[..5], b"%PDF-");

        let doc = lopdf::Document::load_from(std::io::Cursor::new(bytes)).unwrap();
        assert!(doc.get_pages().len() >= 2);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("curto", 10), "curto");
        assert_eq!(truncate("Tinta Acrílica Premium Fosca", 10), "Tinta Acrí...");
    }

    #[test]
    fn latin1_degrades_unmappable_chars() {
        assert_eq!(latin1_bytes("Ção"), vec![0xC7, 0xE3, b'o']);
        assert_eq!(latin1_bytes("数"), vec![b'?']);
    }
}
