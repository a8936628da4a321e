// Alert line catalogue. `{role}` is replaced with the group's role mention.

use rand::seq::SliceRandom;
use rand::Rng;

pub const ALERT_TEMPLATES: &[&str] = &[
    "🚨 {role} defense needed now!",
    "⚔️ {role}, time to defend!",
    "🛡️ {role} defend your guild!",
    "💥 {role} is under attack! Join the defense!",
    "⚠️ {role}, rally your team for the defense!",
    "🏹 Urgent call for {role}, the defense needs you!",
    "🔔 {role}, your presence is crucial for the defense!",
];

/// Pick a random alert line and fill in the role mention.
pub fn alert_line<R: Rng + ?Sized>(rng: &mut R, role_mention: &str) -> String {
    let template = ALERT_TEMPLATES
        .choose(rng)
        .copied()
        .unwrap_or("🚨 {role}");
    template.replace("{role}", role_mention)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_line_contains_mention() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let line = alert_line(&mut rng, "<@&1>");
            assert!(line.contains("<@&1>"));
            assert!(!line.contains("{role}"));
        }
    }
}
