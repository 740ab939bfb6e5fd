use clap::{arg, value_parser, ArgAction, Command};

pub fn get_args() -> Command {
    Command::new("goombay")
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(arg!(-v --debug "Print debug information"))
        .arg(
            arg!(-f --fixture <LISTING_JSON> "JSON listing file served as the remote peer's share")
                .required(false)
                .global(true),
        )
        .subcommand(
            Command::new("browse")
                .about("Fetch and page through a peer's shared directories")
                .arg(arg!(<PEER> "The peer whose share to browse"))
                .arg(
                    arg!(-p --page <PAGE> "Page to display")
                        .required(false)
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    arg!(-s --size <PAGE_SIZE> "Directories per page")
                        .required(false)
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    arg!(--search <TEXT> "Keep only directories whose name contains TEXT")
                        .required(false),
                )
                .arg(
                    arg!(-l --limit <COUNT> "Cap the listing at COUNT directories")
                        .required(false)
                        .value_parser(value_parser!(usize)),
                )
                .arg_required_else_help(true),
        )
        .subcommand(
            Command::new("tree")
                .about("Print a peer's share as an indented directory tree")
                .arg(arg!(<PEER> "The peer whose share to display"))
                .arg_required_else_help(true),
        )
        .subcommand(
            Command::new("download")
                .about("Resolve selected directories and files into a transfer batch")
                .arg(arg!(<PEER> "The peer to download from"))
                .arg(
                    arg!(-d --dir <PATH> "Directory to download recursively (repeatable)")
                        .required(false)
                        .action(ArgAction::Append),
                )
                .arg(
                    arg!(--file <PATH> "Single file to download (repeatable)")
                        .required(false)
                        .action(ArgAction::Append),
                )
                .arg_required_else_help(true),
        )
}
