/// How the text after a slash command is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArgShape {
    None,
    /// Shell-split words, quotes allowed (`/include "low poly" fox`).
    Words,
    /// One 1-based index.
    Index,
    /// Two 1-based indices.
    IndexPair,
    /// A 1-based index followed by an optional directory.
    IndexThenPath,
    /// One path, possibly quoted.
    Path,
    OptionalPath,
    Paths,
    /// `on` / `off`.
    Toggle,
    /// `single` / `multi`.
    ColorMode,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub shape: ArgShape,
    pub usage: &'static str,
}

const fn spec(command: &'static str, shape: ArgShape, usage: &'static str) -> CommandSpec {
    CommandSpec {
        command,
        shape,
        usage,
    }
}

pub(crate) const COMMANDS: &[CommandSpec] = &[
    spec("ideas", ArgShape::Words, "/ideas [focus keyword ...]"),
    spec("visualize", ArgShape::Index, "/visualize <idea>"),
    spec("views", ArgShape::IndexPair, "/views <idea> <variation>"),
    spec("save", ArgShape::Index, "/save <model>"),
    spec("saved", ArgShape::None, "/saved"),
    spec("delete", ArgShape::Index, "/delete <saved>"),
    spec("download", ArgShape::IndexThenPath, "/download <model> [dir]"),
    spec(
        "download_saved",
        ArgShape::IndexThenPath,
        "/download_saved <saved> [dir]",
    ),
    spec("keywords", ArgShape::None, "/keywords"),
    spec("include", ArgShape::Words, "/include <keyword> ..."),
    spec("exclude", ArgShape::Words, "/exclude <keyword> ..."),
    spec("uninclude", ArgShape::Words, "/uninclude <keyword> ..."),
    spec("unexclude", ArgShape::Words, "/unexclude <keyword> ..."),
    spec(
        "inspiration_image",
        ArgShape::OptionalPath,
        "/inspiration_image [path]  (no path clears)",
    ),
    spec("extract_image", ArgShape::None, "/extract_image"),
    spec("extract_ideas", ArgShape::None, "/extract_ideas"),
    spec("export", ArgShape::OptionalPath, "/export [path]"),
    spec("import", ArgShape::Path, "/import <path>"),
    spec("confirm", ArgShape::None, "/confirm"),
    spec("cancel", ArgShape::None, "/cancel"),
    spec("upload", ArgShape::Paths, "/upload <image> ..."),
    spec("add_slot", ArgShape::None, "/add_slot"),
    spec("remove_slot", ArgShape::Index, "/remove_slot <slot>"),
    spec("clear_slots", ArgShape::None, "/clear_slots"),
    spec("color", ArgShape::ColorMode, "/color single|multi"),
    spec("layer_lines", ArgShape::Toggle, "/layer_lines on|off"),
    spec("render", ArgShape::None, "/render"),
    spec("rerender", ArgShape::Index, "/rerender <slot>"),
    spec("render_all", ArgShape::None, "/render_all"),
    spec("listing", ArgShape::None, "/listing"),
    spec(
        "download_upload",
        ArgShape::IndexThenPath,
        "/download_upload <slot> [dir]",
    ),
    spec("download_uploads", ArgShape::OptionalPath, "/download_uploads [dir]"),
    spec("status", ArgShape::None, "/status"),
    spec("dismiss", ArgShape::None, "/dismiss"),
    spec("help", ArgShape::None, "/help"),
    spec("quit", ArgShape::None, "/quit"),
];

pub(crate) fn find_command(command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.command == command)
}

pub fn chat_help_lines() -> impl Iterator<Item = &'static str> {
    COMMANDS.iter().map(|spec| spec.usage)
}
