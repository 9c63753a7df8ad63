//! Email rendering with embedded Tera templates.

use std::sync::LazyLock;

use rust_decimal::Decimal;
use tera::{Context, Tera};

use crate::db::{DebtRecord, DocumentRecord};
use crate::error::EngineError;

static TEMPLATES: LazyLock<Result<Tera, String>> = LazyLock::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_templates([
        ("debt_reminder.html", include_str!("templates/debt_reminder.html")),
        (
            "document_reminder.html",
            include_str!("templates/document_reminder.html"),
        ),
    ])
    .map_err(|e| format!("invalid reminder templates: {}", e))?;
    Ok(tera)
});

fn templates() -> Result<&'static Tera, EngineError> {
    match &*TEMPLATES {
        Ok(tera) => Ok(tera),
        Err(err) => Err(EngineError::Template(err.clone())),
    }
}

/// Accent color tier for the remaining-day count, hottest first.
pub fn urgency_color(days_remaining: i64) -> &'static str {
    match days_remaining {
        d if d <= 0 => "#d32f2f",
        d if d <= 3 => "#e64a19",
        d if d <= 7 => "#f57c00",
        d if d <= 30 => "#1976d2",
        _ => "#388e3c",
    }
}

/// Human phrasing for a threshold, used in subjects and headings.
pub fn period_label(threshold_days: i32) -> String {
    match threshold_days {
        0 => "today".to_string(),
        1 => "in 1 day".to_string(),
        60 => "in 2 months".to_string(),
        90 => "in 3 months".to_string(),
        180 => "in 6 months".to_string(),
        d => format!("in {} days", d),
    }
}

pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
}

pub fn render_debt_reminder(
    debt: &DebtRecord,
    threshold_days: i32,
    unpaid_total: Option<Decimal>,
) -> Result<RenderedEmail, EngineError> {
    let label = period_label(threshold_days);
    let mut context = Context::new();
    context.insert("bank", &debt.bank);
    context.insert("proposal_number", &debt.proposal_number);
    context.insert("due_on", &debt.final_due_on.format("%d/%m/%Y").to_string());
    context.insert("days_remaining", &threshold_days);
    context.insert("urgency_color", urgency_color(i64::from(threshold_days)));
    context.insert("period_label", &label);
    context.insert("unpaid_total", &unpaid_total.map(|t| format!("R$ {t}")));
    let html_body = templates()?
        .render("debt_reminder.html", &context)
        .map_err(|e| EngineError::Template(e.to_string()))?;
    Ok(RenderedEmail {
        subject: format!("Debt with {} due {}", debt.bank, label),
        html_body,
    })
}

pub fn render_document_reminder(
    document: &DocumentRecord,
    expires_on: chrono::NaiveDate,
    threshold_days: i32,
) -> Result<RenderedEmail, EngineError> {
    let label = period_label(threshold_days);
    let kind_label = document
        .kind_label
        .clone()
        .unwrap_or_else(|| document.kind.as_str().to_string());
    let mut context = Context::new();
    context.insert("name", &document.name);
    context.insert("kind_label", &kind_label);
    context.insert("expires_on", &expires_on.format("%d/%m/%Y").to_string());
    context.insert("days_remaining", &threshold_days);
    context.insert("urgency_color", urgency_color(i64::from(threshold_days)));
    context.insert("period_label", &label);
    let html_body = templates()?
        .render("document_reminder.html", &context)
        .map_err(|e| EngineError::Template(e.to_string()))?;
    Ok(RenderedEmail {
        subject: format!("Document '{}' expires {}", document.name, label),
        html_body,
    })
}

#[cfg(test)]
mod tests {
    use super::{period_label, urgency_color};

    #[test]
    fn urgency_tiers() {
        assert_eq!(urgency_color(-5), "#d32f2f");
        assert_eq!(urgency_color(0), "#d32f2f");
        assert_eq!(urgency_color(3), "#e64a19");
        assert_eq!(urgency_color(7), "#f57c00");
        assert_eq!(urgency_color(30), "#1976d2");
        assert_eq!(urgency_color(180), "#388e3c");
    }

    #[test]
    fn period_labels() {
        assert_eq!(period_label(0), "today");
        assert_eq!(period_label(1), "in 1 day");
        assert_eq!(period_label(90), "in 3 months");
        assert_eq!(period_label(15), "in 15 days");
    }
}
