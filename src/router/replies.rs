//! Customer-facing reply templates.

use crate::ledger::PointsAward;

/// One tenant's line in a balance or challenge reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantBalance {
    pub tenant_name: String,
    pub total_points: i64,
    pub points_required: i64,
    pub points_to_next: i64,
}

pub const HELP: &str = "Send \"<business> - <branch>\" when you visit to earn points.\n\
Other commands:\n\
- balance: your points at each business\n\
- challenge: how close you are to your next reward\n\
- stop: stop receiving messages from us\n\
You can also send \"name: <your name>\" or \"email: <your email>\" to update your profile.";

pub const NO_POINTS: &str =
    "You don't have any points yet. Check in at a participating business to start earning.";

pub const OPTED_OUT: &str =
    "You will no longer receive messages from us. Your points are kept; check in any time to keep earning.";

pub const PROFILE_UPDATED: &str = "Thanks! Your profile has been updated.";

pub fn check_in(tenant_name: &str, branch_name: Option<&str>, award: &PointsAward) -> String {
    let place = match branch_name {
        Some(branch) => format!("{tenant_name} ({branch})"),
        None => tenant_name.to_string(),
    };
    let mut reply = if award.created {
        format!("Welcome to {place}! You earned {} points.", award.points)
    } else {
        format!("Thanks for visiting {place}! You earned {} points.", award.points)
    };
    reply.push_str(&format!(" Your balance is {} points.", award.total_points()));

    let issued = award.rewards.as_ref().map(|r| r.issued().len()).unwrap_or(0);
    match issued {
        0 => {}
        1 => reply.push_str(" You unlocked a reward! Your code is on its way."),
        n => reply.push_str(&format!(" You unlocked {n} rewards! Your codes are on their way.")),
    }
    reply
}

pub fn tenant_not_found(tenant_name: &str) -> String {
    format!("We couldn't find a business called \"{tenant_name}\". Please check the name and try again.")
}

pub fn balance(balances: &[TenantBalance]) -> String {
    if balances.is_empty() {
        return NO_POINTS.to_string();
    }
    let mut reply = String::from("Your points:");
    for line in balances {
        reply.push_str(&format!("\n- {}: {} points", line.tenant_name, line.total_points));
    }
    reply
}

pub fn challenge(balances: &[TenantBalance]) -> String {
    if balances.is_empty() {
        return NO_POINTS.to_string();
    }
    let mut reply = String::from("Your progress:");
    for line in balances {
        let progress = line.points_required - line.points_to_next;
        reply.push_str(&format!(
            "\n- {}: {}/{} points, {} more for your next reward",
            line.tenant_name, progress, line.points_required, line.points_to_next
        ));
    }
    reply
}

pub fn invalid(reason: &str) -> String {
    format!("Sorry, we couldn't process that: {reason}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, total: i64, to_next: i64) -> TenantBalance {
        TenantBalance {
            tenant_name: name.to_string(),
            total_points: total,
            points_required: 100,
            points_to_next: to_next,
        }
    }

    #[test]
    fn test_balance_lists_each_tenant() {
        let reply = balance(&[line("Acme Bakery", 40, 60), line("Corner Cafe", 5, 95)]);
        assert_eq!(
            reply,
            "Your points:\n- Acme Bakery: 40 points\n- Corner Cafe: 5 points"
        );
    }

    #[test]
    fn test_empty_balances_say_no_points() {
        assert_eq!(balance(&[]), NO_POINTS);
        assert_eq!(challenge(&[]), NO_POINTS);
    }

    #[test]
    fn test_challenge_shows_points_needed() {
        let reply = challenge(&[line("Acme Bakery", 140, 60)]);
        assert!(reply.contains("40/100"));
        assert!(reply.contains("60 more"));
    }
}
