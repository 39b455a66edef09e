use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Responsiveness {
    Yes,
    No,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Airway {
    Clear,
    Blocked,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Breathing {
    Present,
    Absent,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pulse {
    Present,
    Absent,
    #[default]
    Unknown,
}

impl Responsiveness {
    /// Lowercase wire name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Responsiveness::Yes => "yes",
            Responsiveness::No => "no",
            Responsiveness::Unknown => "unknown",
        }
    }
}

impl Airway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Airway::Clear => "clear",
            Airway::Blocked => "blocked",
            Airway::Unknown => "unknown",
        }
    }
}

impl Breathing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Breathing::Present => "present",
            Breathing::Absent => "absent",
            Breathing::Unknown => "unknown",
        }
    }
}

impl Pulse {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pulse::Present => "present",
            Pulse::Absent => "absent",
            Pulse::Unknown => "unknown",
        }
    }
}

/// Patient state for one incident.
///
/// Serialized in camelCase because the dispatch backend receives it verbatim
/// as `patientData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssessmentRecord {
    pub responsive: Responsiveness,
    pub airway: Airway,
    pub breathing: Breathing,
    pub pulse: Pulse,
    pub patient_description: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

impl Default for AssessmentRecord {
    fn default() -> Self {
        Self::create_initial()
    }
}

/// A partial record: `None` means "no signal for this field".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssessmentUpdate {
    pub responsive: Option<Responsiveness>,
    pub airway: Option<Airway>,
    pub breathing: Option<Breathing>,
    pub pulse: Option<Pulse>,
    pub patient_description: Option<String>,
    pub location: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl AssessmentUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

impl AssessmentRecord {
    pub fn create_initial() -> Self {
        Self {
            responsive: Responsiveness::Unknown,
            airway: Airway::Unknown,
            breathing: Breathing::Unknown,
            pulse: Pulse::Unknown,
            patient_description: String::new(),
            location: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Returns a new record with every present field of `update` applied.
    ///
    /// An `Unknown` in the update is treated as absent: a concrete value is
    /// never reset to `Unknown` within an incident.
    pub fn merge(&self, update: &AssessmentUpdate) -> AssessmentRecord {
        let mut next = self.clone();

        if let Some(v) = update.responsive.filter(|v| *v != Responsiveness::Unknown) {
            next.responsive = v;
        }
        if let Some(v) = update.airway.filter(|v| *v != Airway::Unknown) {
            next.airway = v;
        }
        if let Some(v) = update.breathing.filter(|v| *v != Breathing::Unknown) {
            next.breathing = v;
        }
        if let Some(v) = update.pulse.filter(|v| *v != Pulse::Unknown) {
            next.pulse = v;
        }
        if let Some(v) = &update.patient_description {
            next.patient_description = v.clone();
        }
        if let Some(v) = &update.location {
            next.location = v.clone();
        }
        if let Some(v) = update.timestamp {
            next.timestamp = v;
        }

        next
    }

    /// No pulse and no breathing: the condition-based cardiac arrest trigger.
    pub fn indicates_arrest(&self) -> bool {
        self.pulse == Pulse::Absent && self.breathing == Breathing::Absent
    }
}
