//! Format-specific render routines run against a pooled page.

use std::fmt;
use std::time::Duration;

use crate::backend::{BackendError, Page};

const PNG_DEADLINE: Duration = Duration::from_secs(60);
const PDF_DEADLINE: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Png,
    Pdf,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Pdf => "application/pdf",
        }
    }

    /// Upper bound for one render of this format, pool acquisition excluded.
    pub fn deadline(self) -> Duration {
        match self {
            OutputFormat::Png => PNG_DEADLINE,
            OutputFormat::Pdf => PDF_DEADLINE,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// Embeds `html` as a JavaScript string literal.
fn js_string(html: &str) -> String {
    serde_json::Value::String(html.to_string()).to_string()
}

fn document_write_script(html: &str) -> String {
    format!(
        "document.open();document.write({});document.close();",
        js_string(html)
    )
}

fn inner_html_script(html: &str) -> String {
    format!("document.documentElement.innerHTML = {};", js_string(html))
}

pub async fn render(page: &dyn Page, format: OutputFormat, html: &str) -> Result<Vec<u8>, BackendError> {
    match format {
        OutputFormat::Png => render_png(page, html).await,
        OutputFormat::Pdf => render_pdf(page, html).await,
    }
}

async fn render_png(page: &dyn Page, html: &str) -> Result<Vec<u8>, BackendError> {
    page.navigate_blank().await?;
    page.evaluate(&document_write_script(html)).await?;
    page.wait_ready("body").await?;
    page.screenshot_png().await
}

async fn render_pdf(page: &dyn Page, html: &str) -> Result<Vec<u8>, BackendError> {
    page.navigate_blank().await?;
    page.evaluate(&inner_html_script(html)).await?;
    page.wait_visible("body").await?;
    page.print_pdf().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::StubBackend;
    use crate::backend::Launcher;

    #[test]
    fn test_format_metadata() {
        assert_eq!(OutputFormat::Png.mime_type(), "image/png");
        assert_eq!(OutputFormat::Pdf.mime_type(), "application/pdf");
        assert_eq!(OutputFormat::Png.deadline(), Duration::from_secs(60));
        assert_eq!(OutputFormat::Pdf.deadline(), Duration::from_secs(45));
        assert_eq!(OutputFormat::Pdf.to_string(), "PDF");
    }

    #[test]
    fn test_scripts_escape_markup() {
        let script = document_write_script("<p class=\"x\">it's\n</p>");
        assert_eq!(
            script,
            r#"document.open();document.write("<p class=\"x\">it's\n</p>");document.close();"#
        );
        assert_eq!(
            inner_html_script("<b>hi</b>"),
            r#"document.documentElement.innerHTML = "<b>hi</b>";"#
        );
    }

    #[tokio::test]
    async fn test_png_render_uses_document_write() {
        let stub = StubBackend::new(vec![1, 2, 3]);
        let connection = stub.launch().await.unwrap();
        let page = connection.open_page().await.unwrap();

        let bytes = render(page.as_ref(), OutputFormat::Png, "<b>hi</b>").await.unwrap();

        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(StubBackend::count(&stub.counters.navigations), 1);
        assert!(stub.scripts()[0].starts_with("document.open();"));
    }

    #[tokio::test]
    async fn test_pdf_render_sets_inner_html() {
        let stub = StubBackend::new(b"%PDF".to_vec());
        let connection = stub.launch().await.unwrap();
        let page = connection.open_page().await.unwrap();

        let bytes = render(page.as_ref(), OutputFormat::Pdf, "<i>doc</i>").await.unwrap();

        assert_eq!(bytes, b"%PDF".to_vec());
        assert!(stub.scripts()[0].starts_with("document.documentElement.innerHTML"));
    }

    #[tokio::test]
    async fn test_render_fails_on_closed_connection() {
        let stub = StubBackend::new(vec![1]);
        let connection = stub.launch().await.unwrap();
        let page = connection.open_page().await.unwrap();
        connection.close();

        let err = render(page.as_ref(), OutputFormat::Png, "<b>hi</b>")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Closed));
    }
}
