//! Parsing of session input lines.

/// One line of session input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show role availability.
    Status,
    /// Set the name used in replies.
    Name(String),
    /// Shut the workers down and end the session.
    Quit,
    /// Free text for the mesh.
    Input(String),
    /// Blank line.
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();

        match lower.as_str() {
            "" => Command::Empty,
            "status" | "/status" => Command::Status,
            "quit" | "exit" | "/quit" | "/exit" => Command::Quit,
            _ => parse_name(trimmed).unwrap_or_else(|| Command::Input(trimmed.to_string())),
        }
    }
}

/// `name <x>` with a non-empty name; original casing is kept.
fn parse_name(trimmed: &str) -> Option<Command> {
    let (head, rest) = trimmed.split_once(char::is_whitespace)?;
    if !matches!(head.to_lowercase().as_str(), "name" | "/name") {
        return None;
    }
    let name = rest.trim();
    (!name.is_empty()).then(|| Command::Name(name.to_string()))
}
