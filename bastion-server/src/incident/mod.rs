//! Alert incidents.
//!
//! An incident is born when a ping fires and lives as long as its message
//! in the alert channel. While `Open` it collects notes, one evidence image
//! and escalations; the first resolution is final and every later mutation
//! is refused with `AlreadyResolved`.

mod board;
mod evidence;

pub use board::{IncidentBoard, SharedIncident};
pub use evidence::EvidenceWaiters;

use bastion_utils::{IncidentId, MemberId, MessageRef, Outcome, Resolution, RoleId};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::persistence::GroupAffiliation;
use crate::platform::{Control, ControlStyle, MessageContent};

pub const MAX_NOTE_LEN: usize = 100;
const EVIDENCE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg"];
const COLOR_OPEN: u32 = 0xf3_9c_12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IncidentError {
    #[error("This alert was already resolved ({outcome})")]
    AlreadyResolved { outcome: Outcome },
    #[error("Notes cannot be empty")]
    EmptyNote,
    #[error("Note is {len} characters long, the limit is {max}")]
    NoteTooLong { len: usize, max: usize },
    #[error("Evidence must be a .png, .jpg or .jpeg image: {0}")]
    UnsupportedEvidence(String),
    #[error("No image was posted in time")]
    EvidenceTimeout,
}

pub type IncidentResult<T> = Result<T, IncidentError>;

/// Interactive actions offered on an incident message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentControl {
    AddNote,
    Won,
    Lost,
    Evidence,
    Escalate,
}

impl IncidentControl {
    pub const ALL: [IncidentControl; 5] = [
        IncidentControl::AddNote,
        IncidentControl::Won,
        IncidentControl::Lost,
        IncidentControl::Evidence,
        IncidentControl::Escalate,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            IncidentControl::AddNote => "add_note",
            IncidentControl::Won => "won",
            IncidentControl::Lost => "lost",
            IncidentControl::Evidence => "evidence",
            IncidentControl::Escalate => "escalate",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            IncidentControl::AddNote => "Add note",
            IncidentControl::Won => "Won",
            IncidentControl::Lost => "Lost",
            IncidentControl::Evidence => "Evidence",
            IncidentControl::Escalate => "Second defense",
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            IncidentControl::AddNote => "📝",
            IncidentControl::Won => Outcome::Won.icon(),
            IncidentControl::Lost => Outcome::Lost.icon(),
            IncidentControl::Evidence => "📷",
            IncidentControl::Escalate => "⚔️",
        }
    }

    fn style(&self) -> ControlStyle {
        match self {
            IncidentControl::Won => ControlStyle::Success,
            IncidentControl::Lost => ControlStyle::Danger,
            IncidentControl::Escalate => ControlStyle::Primary,
            IncidentControl::AddNote | IncidentControl::Evidence => ControlStyle::Secondary,
        }
    }
}

pub fn control_id(incident: IncidentId, control: IncidentControl) -> String {
    format!("incident:{}:{}", incident, control.key())
}

/// Strip query and fragment, then require an image extension.
pub fn validate_evidence_url(url: &str) -> IncidentResult<String> {
    let url = url.trim();
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    let is_web = path.starts_with("https://") || path.starts_with("http://");

    if is_web && EVIDENCE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        Ok(url.to_string())
    } else {
        Err(IncidentError::UnsupportedEvidence(url.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub author: MemberId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub by: MemberId,
    pub role: RoleId,
}

#[derive(Debug, Clone)]
pub struct AlertIncident {
    pub id: IncidentId,
    pub origin_group: String,
    pub icon: String,
    pub role: RoleId,
    pub initiator: MemberId,
    pub alert_line: String,
    pub opened_at: DateTime<Utc>,
    /// Set once the incident message has been sent
    pub message_ref: Option<MessageRef>,
    notes: Vec<Note>,
    evidence: Option<String>,
    escalations: Vec<Escalation>,
    resolution: Resolution,
    resolved_by: Option<MemberId>,
}

impl AlertIncident {
    pub fn new(
        group: &GroupAffiliation,
        initiator: MemberId,
        alert_line: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: IncidentId::new(),
            origin_group: group.name.clone(),
            icon: group.icon_ref.clone(),
            role: group.membership_role_ref.clone(),
            initiator,
            alert_line,
            opened_at: now,
            message_ref: None,
            notes: Vec::new(),
            evidence: None,
            escalations: Vec::new(),
            resolution: Resolution::Open,
            resolved_by: None,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn is_open(&self) -> bool {
        !self.resolution.is_terminal()
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn evidence(&self) -> Option<&str> {
        self.evidence.as_deref()
    }

    pub fn escalations(&self) -> &[Escalation] {
        &self.escalations
    }

    fn ensure_open(&self) -> IncidentResult<()> {
        match self.resolution.outcome() {
            Some(outcome) => Err(IncidentError::AlreadyResolved { outcome }),
            None => Ok(()),
        }
    }

    pub fn add_note(&mut self, author: MemberId, text: &str) -> IncidentResult<()> {
        self.ensure_open()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(IncidentError::EmptyNote);
        }
        let len = text.chars().count();
        if len > MAX_NOTE_LEN {
            return Err(IncidentError::NoteTooLong {
                len,
                max: MAX_NOTE_LEN,
            });
        }
        self.notes.push(Note {
            author,
            text: text.to_string(),
        });
        Ok(())
    }

    /// Replaces any image attached earlier
    pub fn attach_evidence(&mut self, url: &str) -> IncidentResult<()> {
        self.ensure_open()?;
        self.evidence = Some(validate_evidence_url(url)?);
        Ok(())
    }

    pub fn escalate(&mut self, by: MemberId, role: RoleId) -> IncidentResult<()> {
        self.ensure_open()?;
        self.escalations.push(Escalation { by, role });
        Ok(())
    }

    /// First resolution wins; any later one is refused.
    pub fn resolve(&mut self, outcome: Outcome, by: MemberId) -> IncidentResult<()> {
        self.ensure_open()?;
        self.resolution = outcome.into();
        self.resolved_by = Some(by);
        Ok(())
    }

    pub fn render(&self) -> MessageContent {
        let outcome = self.resolution.outcome();
        let mut content = MessageContent {
            text: Some(self.alert_line.clone()),
            title: format!("{} {} defense", self.icon, self.origin_group),
            description: format!(
                "Called by {} at {}",
                self.initiator.mention(),
                self.opened_at.format("%H:%M UTC")
            ),
            color: Some(outcome.map_or(COLOR_OPEN, |o| o.color())),
            image_url: self.evidence.clone(),
            footer: Some(format!("incident {}", self.id)),
            ..Default::default()
        };

        let notes = if self.notes.is_empty() {
            "No notes yet.".to_string()
        } else {
            self.notes
                .iter()
                .map(|n| format!("• {}: {}", n.author.mention(), n.text))
                .collect::<Vec<_>>()
                .join("\n")
        };
        content.field("Notes", notes, false);

        if !self.escalations.is_empty() {
            let lines = self
                .escalations
                .iter()
                .map(|e| {
                    format!(
                        "⚔️ Second defense for {} called by {}",
                        e.role.mention(),
                        e.by.mention()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            content.field("Escalation", lines, false);
        }

        if let Some(outcome) = outcome {
            let by = self
                .resolved_by
                .as_ref()
                .map(|m| format!(" by {}", m.mention()))
                .unwrap_or_default();
            content.field(
                "Status",
                format!("{} Defense {}{}", outcome.icon(), outcome, by),
                false,
            );
        }

        for control in IncidentControl::ALL {
            content.controls.push(
                Control::new(control_id(self.id, control), control.label(), control.style())
                    .with_icon(control.icon())
                    .disabled(outcome.is_some()),
            );
        }
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident() -> AlertIncident {
        let group = GroupAffiliation::new("Alpha", "🏰", "r-alpha");
        AlertIncident::new(
            &group,
            MemberId::new("42"),
            "🚨 <@&r-alpha> defense needed now!".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_resolution_is_final() {
        let mut incident = incident();
        incident.resolve(Outcome::Won, MemberId::new("1")).unwrap();

        assert_eq!(
            incident.resolve(Outcome::Lost, MemberId::new("2")),
            Err(IncidentError::AlreadyResolved {
                outcome: Outcome::Won
            })
        );
        assert!(matches!(
            incident.add_note(MemberId::new("2"), "late"),
            Err(IncidentError::AlreadyResolved { .. })
        ));
        assert!(incident
            .attach_evidence("https://cdn.example/a.png")
            .is_err());
        assert!(incident
            .escalate(MemberId::new("2"), RoleId::new("r-reserve"))
            .is_err());
        assert_eq!(incident.resolution(), Resolution::Won);
        assert!(incident.notes().is_empty());
    }

    #[test]
    fn test_note_validation() {
        let mut incident = incident();
        assert_eq!(
            incident.add_note(MemberId::new("1"), "   "),
            Err(IncidentError::EmptyNote)
        );
        assert_eq!(
            incident.add_note(MemberId::new("1"), &"x".repeat(101)),
            Err(IncidentError::NoteTooLong { len: 101, max: 100 })
        );

        incident
            .add_note(MemberId::new("1"), "  enemy at the north gate ")
            .unwrap();
        incident.add_note(MemberId::new("2"), &"é".repeat(100)).unwrap();
        assert_eq!(incident.notes()[0].text, "enemy at the north gate");
        assert_eq!(incident.notes().len(), 2);
    }

    #[test]
    fn test_evidence_urls() {
        assert!(validate_evidence_url("https://cdn.example/shot.PNG").is_ok());
        assert!(validate_evidence_url("https://cdn.example/shot.jpeg?width=300").is_ok());
        assert!(validate_evidence_url("https://cdn.example/shot.gif").is_err());
        assert!(validate_evidence_url("https://cdn.example/shot.png.exe").is_err());
        assert!(validate_evidence_url("file:///tmp/shot.png").is_err());

        let mut incident = incident();
        incident
            .attach_evidence("https://cdn.example/one.jpg")
            .unwrap();
        incident
            .attach_evidence("https://cdn.example/two.png")
            .unwrap();
        assert_eq!(incident.evidence(), Some("https://cdn.example/two.png"));
    }

    #[test]
    fn test_render_open_incident() {
        let mut incident = incident();
        let content = incident.render();

        assert_eq!(content.title, "🏰 Alpha defense");
        assert!(content.text.as_deref().unwrap_or("").contains("<@&r-alpha>"));
        assert!(content.description.contains("<@42>"));
        assert_eq!(content.color, Some(COLOR_OPEN));
        assert_eq!(content.fields[0].value, "No notes yet.");
        assert_eq!(content.controls.len(), 5);
        assert!(content.controls.iter().all(|c| !c.disabled));

        incident.add_note(MemberId::new("7"), "need healers").unwrap();
        incident
            .escalate(MemberId::new("7"), RoleId::new("r-reserve"))
            .unwrap();
        let content = incident.render();
        assert_eq!(content.fields[0].value, "• <@7>: need healers");
        assert!(content.fields[1].value.contains("<@&r-reserve>"));
    }

    #[test]
    fn test_render_resolved_incident_disables_controls() {
        let mut incident = incident();
        incident
            .attach_evidence("https://cdn.example/proof.png")
            .unwrap();
        incident.resolve(Outcome::Lost, MemberId::new("9")).unwrap();

        let content = incident.render();
        assert_eq!(content.color, Some(Outcome::Lost.color()));
        assert_eq!(content.image_url.as_deref(), Some("https://cdn.example/proof.png"));
        assert!(content.controls.iter().all(|c| c.disabled));

        let status = content.fields.iter().find(|f| f.name == "Status").unwrap();
        assert_eq!(status.value, "✗ Defense lost by <@9>");
        let won = control_id(incident.id, IncidentControl::Won);
        assert!(content.control(&won).unwrap().disabled);
    }
}
