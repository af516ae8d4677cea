//! src/control.rs
//!
//! Parsing for broadcaster `!system` commands. The content is the text
//! after the command token, e.g. `restart suika` or `git pull`.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

impl FromStr for ServiceAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemCommand {
    Status,
    GitPull,
    Service {
        action: ServiceAction,
        target: String,
    },
    SetLive,
    SetOffline,
}

pub fn parse(content: &str) -> Option<SystemCommand> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    match tokens.as_slice() {
        ["status", ..] => Some(SystemCommand::Status),
        ["git", "pull", ..] => Some(SystemCommand::GitPull),
        ["set", "live", ..] => Some(SystemCommand::SetLive),
        ["set", "offline", ..] => Some(SystemCommand::SetOffline),
        [action, target, ..] => {
            let action = ServiceAction::from_str(action).ok()?;
            Some(SystemCommand::Service {
                action,
                target: (*target).to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_service_commands() {
        assert_eq!(
            parse("restart suika"),
            Some(SystemCommand::Service {
                action: ServiceAction::Restart,
                target: "suika".to_string()
            })
        );
        assert_eq!(
            parse("start all"),
            Some(SystemCommand::Service {
                action: ServiceAction::Start,
                target: "all".to_string()
            })
        );
        assert_eq!(
            parse("stop manager"),
            Some(SystemCommand::Service {
                action: ServiceAction::Stop,
                target: "manager".to_string()
            })
        );
    }

    #[test]
    fn parses_fixed_commands() {
        assert_eq!(parse("status"), Some(SystemCommand::Status));
        assert_eq!(parse("git pull"), Some(SystemCommand::GitPull));
        assert_eq!(parse("set live"), Some(SystemCommand::SetLive));
        assert_eq!(parse("set offline"), Some(SystemCommand::SetOffline));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("dance"), None);
        assert_eq!(parse("start"), None);
        assert_eq!(parse("explode everything"), None);
    }
}
