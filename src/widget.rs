use eframe::egui::{Button, Color32, Label, RichText, Rounding};

use crate::status::{Severity, Status};


pub fn get_heart_rate_label(heart_rate: Option<u16>) -> Label {
    let text = match heart_rate {
        Some(heart_rate) => format!("HR: {heart_rate}"),
        None => "HR: --".to_string(),
    };
    let live_hr_text = RichText::new(text)
        .color(Color32::RED)
        .size(40.0);

    Label::new(live_hr_text)
}

pub fn get_control_button(text: &str) -> Button<'static> {
    let text = RichText::new(text)
        .color(Color32::WHITE)
        .size(20.0);

    Button::new(text)
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
}

pub fn get_status_label(status: Option<&Status>) -> Label {
    let Some(status) = status else { return Label::new(""); };

    let color = match status.severity {
        Severity::Info => Color32::GRAY,
        Severity::Warning => Color32::YELLOW,
        Severity::Error => Color32::RED,
    };

    Label::new(RichText::new(&status.text).color(color))
}
