//! Spoken report and SMS text for a dispatched incident
//!
//! Every value interpolated into the call script is XML-escaped, since the
//! script is sent as markup to the telephony provider.

use pulse_core::AssessmentRecord;

const REPORT_DESCRIPTION_DEFAULT: &str = "Patient details unavailable";
const REPORT_LOCATION_DEFAULT: &str = "Location unknown";
const SMS_DESCRIPTION_DEFAULT: &str = "A person";
const SMS_LOCATION_DEFAULT: &str = "Location being determined";

const DISPATCH_STATEMENT: &str = "This is an automated emergency alert. A bystander is performing CPR. Please dispatch emergency services immediately.";

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// The spoken assessment, whitespace collapsed to single spaces.
pub fn build_patient_report(record: &AssessmentRecord) -> String {
    let description = or_default(&record.patient_description, REPORT_DESCRIPTION_DEFAULT);
    let location = or_default(&record.location, REPORT_LOCATION_DEFAULT);

    let report = format!(
        "Emergency medical alert. This is an AI assistant from Pulse.
        A bystander has found an unresponsive person and is initiating CPR.

        Patient assessment:
        Airway: {}.
        Breathing: {}.
        Pulse: {}.
        Responsiveness: {}.

        Patient description: {}.

        Location: {}.

        CPR is in progress. Please dispatch emergency medical services immediately.",
        escape_xml(record.airway.as_str()),
        escape_xml(record.breathing.as_str()),
        escape_xml(record.pulse.as_str()),
        escape_xml(record.responsive.as_str()),
        escape_xml(description),
        escape_xml(location),
    );

    report.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Voice markup: the report twice, then the dispatch request.
pub fn build_call_script(report: &str, voice: &str, language: &str) -> String {
    let voice = escape_xml(voice);
    let language = escape_xml(language);
    let say = |text: &str| format!("<Say voice=\"{voice}\" language=\"{language}\">{text}</Say>");

    format!(
        "<Response><Pause length=\"1\"/>{}<Pause length=\"2\"/>{}<Pause length=\"1\"/>{}</Response>",
        say(report),
        say(&format!("I repeat. {report}")),
        say(DISPATCH_STATEMENT),
    )
}

pub fn build_family_sms(record: &AssessmentRecord, location: Option<&str>) -> String {
    let description = or_default(&record.patient_description, SMS_DESCRIPTION_DEFAULT);
    let location = location
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(SMS_LOCATION_DEFAULT);

    format!(
        "EMERGENCY ALERT from Pulse:

A bystander is providing emergency assistance to {description}.

Location: {location}

Emergency services have been contacted. CPR is in progress.

This is an automated alert. Please stay calm and await further updates."
    )
}
