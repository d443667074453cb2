use crate::config::ChannelsConfig;

/// Authorization tier for messaging-channel admin commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTier {
    None,
    User,
    Operator,
    Admin,
}

/// Numeric level for tier comparison: user < operator < admin.
pub fn tier_level(tier: CommandTier) -> u8 {
    match tier {
        CommandTier::Admin => 3,
        CommandTier::Operator => 2,
        CommandTier::User => 1,
        CommandTier::None => 0,
    }
}

/// A recognized admin command with its arguments and the sender's tier.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub command: String,
    pub args: Vec<String>,
    pub tier: CommandTier,
}

/// Parse a messaging-channel message as an admin command.
///
/// Returns `None` for plain chat. A recognized verb is returned even when
/// the sender's tier is insufficient, so the caller can reply with an
/// explicit denial instead of silently routing to the agent.
pub fn parse_channel_command(
    content: &str,
    from: &str,
    channels: &ChannelsConfig,
) -> Option<ParsedCommand> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    let wa = &channels.whatsapp;
    let tier = resolve_tier(from, &wa.allow_from, &wa.operators, &wa.admins);
    if tier == CommandTier::None {
        return None;
    }

    let lower = content.to_lowercase();
    let fields: Vec<String> = content.split_whitespace().map(str::to_string).collect();

    let (command, args): (&str, Vec<String>) =
        if lower.starts_with("/config ") || lower.starts_with("config ") {
            if fields.len() < 2 {
                return None;
            }
            ("config", fields[1..].to_vec())
        } else if lower.starts_with("/agents") || lower == "agents" {
            ("agents", fields[1..].to_vec())
        } else if lower.starts_with("/monitors") || lower == "monitors" {
            ("monitors", fields[1..].to_vec())
        } else if lower.starts_with("/audit ") || lower.starts_with("audit ") {
            if fields.len() < 2 {
                return None;
            }
            ("audit", fields[1..].to_vec())
        } else if lower.starts_with("/status") || lower == "status" {
            ("status", Vec::new())
        } else if lower.starts_with("/cli") || lower == "cli" || lower.starts_with("cli ") {
            ("cli", fields[1..].to_vec())
        } else {
            return None;
        };

    Some(ParsedCommand {
        command: command.to_string(),
        args,
        tier,
    })
}

fn resolve_tier(
    from: &str,
    allow_from: &[String],
    operators: &[String],
    admins: &[String],
) -> CommandTier {
    // A non-empty allow list excludes everyone else entirely.
    if !allow_from.is_empty() && !allow_from.iter().any(|a| a == from) {
        return CommandTier::None;
    }
    if admins.iter().any(|a| a == from) {
        return CommandTier::Admin;
    }
    if operators.iter().any(|o| o == from) {
        return CommandTier::Operator;
    }
    CommandTier::User
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WhatsAppConfig;

    fn channels(allow: &[&str], ops: &[&str], admins: &[&str]) -> ChannelsConfig {
        ChannelsConfig {
            whatsapp: WhatsAppConfig {
                enabled: true,
                allow_from: allow.iter().map(|s| s.to_string()).collect(),
                operators: ops.iter().map(|s| s.to_string()).collect(),
                admins: admins.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    #[test]
    fn tier_ordering() {
        assert!(tier_level(CommandTier::Admin) > tier_level(CommandTier::Operator));
        assert!(tier_level(CommandTier::Operator) > tier_level(CommandTier::User));
        assert!(tier_level(CommandTier::User) > tier_level(CommandTier::None));
    }

    #[test]
    fn parses_known_verbs() {
        let ch = channels(&[], &[], &[]);
        let cmd = parse_channel_command("status", "u1", &ch).unwrap();
        assert_eq!(cmd.command, "status");
        assert_eq!(cmd.tier, CommandTier::User);

        let cmd = parse_channel_command("/config get task.timeout_sec", "u1", &ch).unwrap();
        assert_eq!(cmd.command, "config");
        assert_eq!(cmd.args, vec!["get", "task.timeout_sec"]);

        let cmd = parse_channel_command("cli list", "u1", &ch).unwrap();
        assert_eq!(cmd.command, "cli");
        assert_eq!(cmd.args, vec!["list"]);

        let cmd = parse_channel_command("audit t-123", "u1", &ch).unwrap();
        assert_eq!(cmd.command, "audit");
        assert_eq!(cmd.args, vec!["t-123"]);
    }

    #[test]
    fn plain_chat_is_not_a_command() {
        let ch = channels(&[], &[], &[]);
        assert!(parse_channel_command("hello there", "u1", &ch).is_none());
        assert!(parse_channel_command("", "u1", &ch).is_none());
        // Bare "config" without args is chat, matching the verb grammar.
        assert!(parse_channel_command("config", "u1", &ch).is_none());
    }

    #[test]
    fn allow_list_excludes_strangers() {
        let ch = channels(&["1555"], &[], &[]);
        assert!(parse_channel_command("status", "1999", &ch).is_none());
        assert!(parse_channel_command("status", "1555", &ch).is_some());
    }

    #[test]
    fn tiers_resolve_from_lists() {
        let ch = channels(&[], &["op1"], &["adm1"]);
        assert_eq!(
            parse_channel_command("status", "adm1", &ch).unwrap().tier,
            CommandTier::Admin
        );
        assert_eq!(
            parse_channel_command("status", "op1", &ch).unwrap().tier,
            CommandTier::Operator
        );
        assert_eq!(
            parse_channel_command("status", "other", &ch).unwrap().tier,
            CommandTier::User
        );
    }

    #[test]
    fn insufficient_tier_still_returns_command() {
        // The caller decides on denial; parsing succeeds with the low tier.
        let ch = channels(&[], &[], &["adm1"]);
        let cmd = parse_channel_command("agents", "pleb", &ch).unwrap();
        assert_eq!(cmd.command, "agents");
        assert_eq!(cmd.tier, CommandTier::User);
    }
}
