use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS};

/// One parsed line of chat input.
///
/// Slash commands map to a named action with their arguments in
/// `command_args`; anything else is a `message` for the travel guide.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub message: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            message: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("message", text);
    intent.message = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
        assert_eq!(parse_intent("").action, "noop");
    }

    #[test]
    fn plain_text_becomes_message() {
        let intent = parse_intent("  What's the best time to visit?  ");
        assert_eq!(intent.action, "message");
        assert_eq!(
            intent.message.as_deref(),
            Some("What's the best time to visit?")
        );
    }

    #[test]
    fn identify_accepts_quoted_paths() {
        let intent = parse_intent("/identify \"/tmp/paris trip/tower.jpg\"");
        assert_eq!(intent.action, "identify");
        assert_eq!(
            intent.command_args["path"],
            json!("/tmp/paris trip/tower.jpg")
        );
        assert_eq!(intent.arg_str("path"), Some("/tmp/paris trip/tower.jpg"));

        let bare = parse_intent("/IDENTIFY tower.png");
        assert_eq!(bare.action, "identify");
        assert_eq!(bare.command_args["path"], json!("tower.png"));
    }

    #[test]
    fn identify_without_path_has_empty_arg() {
        let intent = parse_intent("/identify");
        assert_eq!(intent.action, "identify");
        assert_eq!(intent.arg_str("path"), None);
    }

    #[test]
    fn no_arg_commands_and_aliases() {
        assert_eq!(parse_intent("/landmark").action, "show_landmark");
        assert_eq!(parse_intent("/history").action, "show_history");
        assert_eq!(parse_intent("/models").action, "list_models");
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn unknown_command_keeps_name_and_arg() {
        let intent = parse_intent("/teleport rome now");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("teleport"));
        assert_eq!(intent.command_args["arg"], json!("rome now"));
    }

    #[test]
    fn lone_slash_is_a_message() {
        let intent = parse_intent("/ is that a path?");
        assert_eq!(intent.action, "message");
    }
}
