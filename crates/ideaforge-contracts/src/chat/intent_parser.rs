use super::command_registry::{find_command, ArgShape};

/// A parsed line of interactive input. Indices are 1-based, as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Noop,
    Help,
    Quit,
    Status,
    Dismiss,
    Ideas { focus: Vec<String> },
    Visualize { idea: usize },
    Views { idea: usize, variation: usize },
    Save { model: usize },
    Saved,
    Delete { saved: usize },
    Download { model: usize, dir: Option<String> },
    DownloadSaved { saved: usize, dir: Option<String> },
    Keywords,
    Include { keywords: Vec<String> },
    Exclude { keywords: Vec<String> },
    Uninclude { keywords: Vec<String> },
    Unexclude { keywords: Vec<String> },
    InspirationImage { path: Option<String> },
    ExtractFromImage,
    ExtractFromIdeas,
    Export { path: Option<String> },
    Import { path: String },
    ConfirmImport,
    CancelImport,
    Upload { paths: Vec<String> },
    AddSlot,
    RemoveSlot { slot: usize },
    ClearSlots,
    SetMultiColor { multi: bool },
    SetLayerLines { on: bool },
    Render,
    Rerender { slot: usize },
    RenderAll,
    Listing,
    DownloadUpload { slot: usize, dir: Option<String> },
    DownloadUploads { dir: Option<String> },
    Unknown { command: String, arg: String },
    /// A known command whose arguments did not parse.
    Invalid { command: String, usage: String },
}

enum Args {
    None,
    Words(Vec<String>),
    Index(usize),
    IndexPair(usize, usize),
    IndexThenPath(usize, Option<String>),
    Path(Option<String>),
    Paths(Vec<String>),
    Flag(bool),
}

fn split_words(arg: &str) -> Vec<String> {
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

fn parse_index(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|value| *value > 0)
}

fn parse_args(shape: ArgShape, arg: &str) -> Option<Args> {
    let words = split_words(arg);
    match shape {
        ArgShape::None => Some(Args::None),
        ArgShape::Words => Some(Args::Words(words)),
        ArgShape::Paths if words.is_empty() => None,
        ArgShape::Paths => Some(Args::Paths(words)),
        ArgShape::Index => match words.as_slice() {
            [index] => parse_index(index).map(Args::Index),
            _ => None,
        },
        ArgShape::IndexPair => match words.as_slice() {
            [first, second] => Some(Args::IndexPair(parse_index(first)?, parse_index(second)?)),
            _ => None,
        },
        ArgShape::IndexThenPath => match words.as_slice() {
            [index] => Some(Args::IndexThenPath(parse_index(index)?, None)),
            [index, rest @ ..] => Some(Args::IndexThenPath(
                parse_index(index)?,
                Some(rest.join(" ")),
            )),
            [] => None,
        },
        ArgShape::Path if words.is_empty() => None,
        ArgShape::Path | ArgShape::OptionalPath => Some(Args::Path(if words.is_empty() {
            None
        } else {
            Some(words.join(" "))
        })),
        ArgShape::Toggle => match words.as_slice() {
            [value] => match value.to_ascii_lowercase().as_str() {
                "on" | "true" | "yes" => Some(Args::Flag(true)),
                "off" | "false" | "no" => Some(Args::Flag(false)),
                _ => None,
            },
            _ => None,
        },
        ArgShape::ColorMode => match words.as_slice() {
            [value] => match value.to_ascii_lowercase().as_str() {
                "multi" => Some(Args::Flag(true)),
                "single" => Some(Args::Flag(false)),
                _ => None,
            },
            _ => None,
        },
    }
}

fn build(command: &str, args: Args) -> Option<ChatCommand> {
    let parsed = match (command, args) {
        ("ideas", Args::Words(focus)) => ChatCommand::Ideas { focus },
        ("visualize", Args::Index(idea)) => ChatCommand::Visualize { idea },
        ("views", Args::IndexPair(idea, variation)) => ChatCommand::Views { idea, variation },
        ("save", Args::Index(model)) => ChatCommand::Save { model },
        ("saved", Args::None) => ChatCommand::Saved,
        ("delete", Args::Index(saved)) => ChatCommand::Delete { saved },
        ("download", Args::IndexThenPath(model, dir)) => ChatCommand::Download { model, dir },
        ("download_saved", Args::IndexThenPath(saved, dir)) => {
            ChatCommand::DownloadSaved { saved, dir }
        }
        ("keywords", Args::None) => ChatCommand::Keywords,
        ("include", Args::Words(keywords)) if !keywords.is_empty() => {
            ChatCommand::Include { keywords }
        }
        ("exclude", Args::Words(keywords)) if !keywords.is_empty() => {
            ChatCommand::Exclude { keywords }
        }
        ("uninclude", Args::Words(keywords)) if !keywords.is_empty() => {
            ChatCommand::Uninclude { keywords }
        }
        ("unexclude", Args::Words(keywords)) if !keywords.is_empty() => {
            ChatCommand::Unexclude { keywords }
        }
        ("inspiration_image", Args::Path(path)) => ChatCommand::InspirationImage { path },
        ("extract_image", Args::None) => ChatCommand::ExtractFromImage,
        ("extract_ideas", Args::None) => ChatCommand::ExtractFromIdeas,
        ("export", Args::Path(path)) => ChatCommand::Export { path },
        ("import", Args::Path(Some(path))) => ChatCommand::Import { path },
        ("confirm", Args::None) => ChatCommand::ConfirmImport,
        ("cancel", Args::None) => ChatCommand::CancelImport,
        ("upload", Args::Paths(paths)) => ChatCommand::Upload { paths },
        ("add_slot", Args::None) => ChatCommand::AddSlot,
        ("remove_slot", Args::Index(slot)) => ChatCommand::RemoveSlot { slot },
        ("clear_slots", Args::None) => ChatCommand::ClearSlots,
        ("color", Args::Flag(multi)) => ChatCommand::SetMultiColor { multi },
        ("layer_lines", Args::Flag(on)) => ChatCommand::SetLayerLines { on },
        ("render", Args::None) => ChatCommand::Render,
        ("rerender", Args::Index(slot)) => ChatCommand::Rerender { slot },
        ("render_all", Args::None) => ChatCommand::RenderAll,
        ("listing", Args::None) => ChatCommand::Listing,
        ("download_upload", Args::IndexThenPath(slot, dir)) => {
            ChatCommand::DownloadUpload { slot, dir }
        }
        ("download_uploads", Args::Path(dir)) => ChatCommand::DownloadUploads { dir },
        ("status", Args::None) => ChatCommand::Status,
        ("dismiss", Args::None) => ChatCommand::Dismiss,
        ("help", Args::None) => ChatCommand::Help,
        ("quit", Args::None) => ChatCommand::Quit,
        _ => return None,
    };
    Some(parsed)
}

/// Parse one line of input. Bare text asks for ideas focused on the
/// comma-separated phrases it contains.
pub fn parse_command(text: &str) -> ChatCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatCommand::Noop;
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return ChatCommand::Ideas {
            focus: raw_trimmed
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .collect(),
        };
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    let Some(spec) = find_command(&command) else {
        return ChatCommand::Unknown {
            command,
            arg: arg.to_string(),
        };
    };
    parse_args(spec.shape, arg)
        .and_then(|args| build(spec.command, args))
        .unwrap_or_else(|| ChatCommand::Invalid {
            command: spec.command.to_string(),
            usage: spec.usage.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::{parse_command, ChatCommand};
    use crate::chat::chat_help_lines;

    #[test]
    fn parse_ideas_with_quoted_focus() {
        assert_eq!(
            parse_command("/ideas \"low poly\" fox"),
            ChatCommand::Ideas {
                focus: vec!["low poly".to_string(), "fox".to_string()]
            }
        );
        assert_eq!(
            parse_command("/ideas"),
            ChatCommand::Ideas { focus: Vec::new() }
        );
    }

    #[test]
    fn bare_text_is_a_focused_idea_request() {
        assert_eq!(
            parse_command("  moon, tide pool "),
            ChatCommand::Ideas {
                focus: vec!["moon".to_string(), "tide pool".to_string()]
            }
        );
        assert_eq!(parse_command("   "), ChatCommand::Noop);
    }

    #[test]
    fn parse_index_commands() {
        assert_eq!(
            parse_command("/views 2 3"),
            ChatCommand::Views {
                idea: 2,
                variation: 3
            }
        );
        assert_eq!(parse_command("/VISUALIZE 1"), ChatCommand::Visualize { idea: 1 });
        assert_eq!(
            parse_command("/download 1 \"/tmp/my renders\""),
            ChatCommand::Download {
                model: 1,
                dir: Some("/tmp/my renders".to_string())
            }
        );
    }

    #[test]
    fn zero_or_missing_index_is_invalid() {
        assert!(matches!(
            parse_command("/visualize 0"),
            ChatCommand::Invalid { .. }
        ));
        match parse_command("/views 1") {
            ChatCommand::Invalid { command, usage } => {
                assert_eq!(command, "views");
                assert_eq!(usage, "/views <idea> <variation>");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_visualizer_settings() {
        assert_eq!(
            parse_command("/color multi"),
            ChatCommand::SetMultiColor { multi: true }
        );
        assert_eq!(
            parse_command("/layer_lines off"),
            ChatCommand::SetLayerLines { on: false }
        );
        assert!(matches!(
            parse_command("/color rainbow"),
            ChatCommand::Invalid { .. }
        ));
        assert_eq!(
            parse_command("/upload a.png \"/tmp/b c.png\""),
            ChatCommand::Upload {
                paths: vec!["a.png".to_string(), "/tmp/b c.png".to_string()]
            }
        );
    }

    #[test]
    fn optional_path_commands() {
        assert_eq!(
            parse_command("/inspiration_image"),
            ChatCommand::InspirationImage { path: None }
        );
        assert_eq!(
            parse_command("/export out.json"),
            ChatCommand::Export {
                path: Some("out.json".to_string())
            }
        );
        assert_eq!(
            parse_command("/download_uploads"),
            ChatCommand::DownloadUploads { dir: None }
        );
        assert_eq!(
            parse_command("/download_uploads renders"),
            ChatCommand::DownloadUploads {
                dir: Some("renders".to_string())
            }
        );
        assert!(matches!(parse_command("/import"), ChatCommand::Invalid { .. }));
        assert!(matches!(parse_command("/include"), ChatCommand::Invalid { .. }));
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(
            parse_command("/magic foo bar"),
            ChatCommand::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string()
            }
        );
    }

    #[test]
    fn help_lists_every_command() {
        let lines: Vec<&str> = chat_help_lines().collect();
        assert!(lines.contains(&"/render_all"));
        assert!(lines.iter().all(|line| line.starts_with('/')));
    }
}
