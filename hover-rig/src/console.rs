//! Line commands accepted on the operator console.

use std::str::FromStr;

use hover_control::SetpointCommand;
use thiserror::Error;

/// One parsed console line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Setpoint(SetpointCommand),
    Stop,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown command '{0}' (expected up, down, pitch+, pitch-, height <value> or stop)")]
pub struct UnknownCommand(pub String);

impl FromStr for ConsoleCommand {
    type Err = UnknownCommand;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = match (words.next(), words.next(), words.next()) {
            (Some("up"), None, _) => ConsoleCommand::Setpoint(SetpointCommand::IncreaseTargetHeight),
            (Some("down"), None, _) => {
                ConsoleCommand::Setpoint(SetpointCommand::DecreaseTargetHeight)
            }
            (Some("pitch+"), None, _) => ConsoleCommand::Setpoint(SetpointCommand::IncreasePitch),
            (Some("pitch-"), None, _) => ConsoleCommand::Setpoint(SetpointCommand::DecreasePitch),
            (Some("height"), Some(value), None) => match value.parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    ConsoleCommand::Setpoint(SetpointCommand::SetTargetHeight(v))
                }
                _ => return Err(UnknownCommand(line.trim().to_string())),
            },
            (Some("stop" | "q" | "quit"), None, _) => ConsoleCommand::Stop,
            _ => return Err(UnknownCommand(line.trim().to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_keys() {
        assert_eq!(
            "up".parse(),
            Ok(ConsoleCommand::Setpoint(SetpointCommand::IncreaseTargetHeight))
        );
        assert_eq!(
            "  down \n".parse(),
            Ok(ConsoleCommand::Setpoint(SetpointCommand::DecreaseTargetHeight))
        );
        assert_eq!(
            "pitch-".parse(),
            Ok(ConsoleCommand::Setpoint(SetpointCommand::DecreasePitch))
        );
        assert_eq!("stop".parse(), Ok(ConsoleCommand::Stop));
        assert_eq!(
            "height 380".parse(),
            Ok(ConsoleCommand::Setpoint(SetpointCommand::SetTargetHeight(380.0)))
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("jump".parse::<ConsoleCommand>().is_err());
        assert!("up 3".parse::<ConsoleCommand>().is_err());
        assert!("height nan".parse::<ConsoleCommand>().is_err());
        assert!("".parse::<ConsoleCommand>().is_err());
    }
}
