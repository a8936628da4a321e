// Panel content

use chrono::{DateTime, Utc};

use crate::platform::{Control, ControlStyle, MessageContent};

/// Footer token identifying our panel among channel messages
pub const PANEL_MARKER: &str = "bastion-panel";

const COLOR_OPERATIONAL: u32 = 0x2e_cc_71;
const COLOR_STANDBY: u32 = 0x95_a5_a6;

/// One group's line on the panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRow {
    pub name: String,
    pub icon: String,
    pub online: u32,
    pub pings_24h: u32,
}

/// Online count descending, then name ascending
pub fn sort_rows(rows: &mut [GroupRow]) {
    rows.sort_by(|a, b| b.online.cmp(&a.online).then_with(|| a.name.cmp(&b.name)));
}

pub fn ping_control_id(group: &str) -> String {
    format!("ping:{}", group)
}

pub fn is_panel(content: &MessageContent) -> bool {
    content
        .footer
        .as_deref()
        .map_or(false, |footer| footer.contains(PANEL_MARKER))
}

/// Build the panel from pre-computed rows. Rows past `max_groups` are
/// folded into a "+N more groups" line.
pub fn panel_content(
    mut rows: Vec<GroupRow>,
    total_online: u32,
    now: DateTime<Utc>,
    max_groups: usize,
) -> MessageContent {
    sort_rows(&mut rows);
    let hidden = rows.len().saturating_sub(max_groups);
    rows.truncate(max_groups);

    let (status, color) = if total_online > 0 {
        ("🟢 Operational", COLOR_OPERATIONAL)
    } else {
        ("⚪ Standby", COLOR_STANDBY)
    };

    let mut description = format!(
        "**{}** defenders online · {}\nStatus: {}",
        total_online,
        now.format("%Y-%m-%d"),
        status
    );
    if rows.is_empty() {
        description.push_str("\nNo groups registered.");
    }
    if hidden > 0 {
        let noun = if hidden == 1 { "group" } else { "groups" };
        description.push_str(&format!("\n+{} more {}", hidden, noun));
    }

    let mut content = MessageContent {
        title: "🛡 Defense status".to_string(),
        description,
        color: Some(color),
        footer: Some(format!(
            "{} · updated {}",
            PANEL_MARKER,
            now.format("%H:%M UTC")
        )),
        ..Default::default()
    };

    for row in &rows {
        content.field(
            format!("{} {}", row.icon, row.name),
            format!("{} online · {} pings (24h)", row.online, row.pings_24h),
            true,
        );
        content.controls.push(
            Control::new(ping_control_id(&row.name), &row.name, ControlStyle::Secondary)
                .with_icon(&row.icon),
        );
    }

    content
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, online: u32) -> GroupRow {
        GroupRow {
            name: name.to_string(),
            icon: "🏰".to_string(),
            online,
            pings_24h: 0,
        }
    }

    #[test]
    fn test_rows_sorted_by_online_then_name() {
        let mut rows = vec![row("Charlie", 1), row("Bravo", 3), row("Alpha", 1)];
        sort_rows(&mut rows);
        let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Bravo", "Alpha", "Charlie"]);
    }

    #[test]
    fn test_overflow_is_reported() {
        let rows: Vec<_> = (0..13).map(|i| row(&format!("G{:02}", i), i)).collect();
        let content = panel_content(rows, 78, Utc::now(), 10);

        assert_eq!(content.fields.len(), 10);
        assert_eq!(content.controls.len(), 10);
        assert!(content.description.contains("+3 more groups"));
        assert!(content.fields[0].name.ends_with("G12"));
    }

    #[test]
    fn test_marker_and_status() {
        let content = panel_content(vec![row("Alpha", 0)], 0, Utc::now(), 10);
        assert!(is_panel(&content));
        assert!(content.description.contains("Standby"));
        assert_eq!(content.control("ping:Alpha").map(|c| c.disabled), Some(false));

        let content = panel_content(vec![row("Alpha", 2)], 2, Utc::now(), 10);
        assert!(content.description.contains("Operational"));
        assert!(!is_panel(&MessageContent::default()));
    }
}
