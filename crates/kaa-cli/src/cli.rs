//! Command-line grammar

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

fn out_arg() -> Arg {
    Arg::new("out")
        .long("out")
        .short('o')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("File to write")
}

fn path_arg() -> Arg {
    Arg::new("path")
        .required(true)
        .help("Dot path into the document, e.g. user_configs.0.options.purchase.enabled")
}

fn json_arg() -> Arg {
    Arg::new("value")
        .required(true)
        .help("New value as JSON; anything that is not valid JSON is taken as a string")
}

fn id_arg() -> Arg {
    Arg::new("id").required(true).help("Solution id")
}

fn full_arg() -> Arg {
    Arg::new("full")
        .long("full")
        .action(ArgAction::SetTrue)
        .help("Full resolution instead of a thumbnail")
}

/// The `kaa` command tree
#[must_use]
pub fn command() -> Command {
    Command::new("kaa")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Control a kaa automation backend")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML settings file"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .global(true)
                .help("Backend address, overrides settings and KAA_API_BASE"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("config")
                .about("Full user configuration")
                .subcommand_required(true)
                .subcommand(Command::new("get").about("Print one value").arg(path_arg()))
                .subcommand(
                    Command::new("set")
                        .about("Change one value and save the whole document")
                        .arg(path_arg())
                        .arg(json_arg()),
                )
                .subcommand(
                    Command::new("export").about("Print the whole document").arg(
                        Arg::new("yaml")
                            .long("yaml")
                            .action(ArgAction::SetTrue)
                            .help("YAML instead of JSON"),
                    ),
                )
                .subcommand(
                    Command::new("patch")
                        .about("Change one option and send only the changed subtree")
                        .arg(path_arg())
                        .arg(json_arg()),
                ),
        )
        .subcommand(
            Command::new("quick")
                .about("Dashboard module switches")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("List switches"))
                .subcommand(
                    Command::new("set")
                        .about("Turn one switch on or off")
                        .arg(Arg::new("flag").required(true))
                        .arg(
                            Arg::new("enabled")
                                .required(true)
                                .value_parser(value_parser!(bool)),
                        ),
                )
                .subcommand(
                    Command::new("toggle")
                        .about("Flip one switch")
                        .arg(Arg::new("flag").required(true)),
                ),
        )
        .subcommand(
            Command::new("tasks")
                .about("Scheduler overview and actions")
                .subcommand_required(true)
                .subcommand(Command::new("overview").about("Buttons and runtime"))
                .subcommand(Command::new("list").about("Per-task status"))
                .subcommand(Command::new("run-all").about("Start every enabled task"))
                .subcommand(Command::new("stop").about("Stop the run"))
                .subcommand(
                    Command::new("run")
                        .about("Run a single task")
                        .arg(Arg::new("name").required(true)),
                )
                .subcommand(Command::new("pause").about("Pause or resume")),
        )
        .subcommand(
            Command::new("run")
                .about("Run buttons")
                .subcommand_required(true)
                .subcommand(Command::new("state").about("Raw run state"))
                .subcommand(Command::new("toggle").about("Start or stop"))
                .subcommand(Command::new("start-all").about("Start every enabled task"))
                .subcommand(Command::new("stop-all").about("Stop everything"))
                .subcommand(Command::new("pause").about("Pause or resume")),
        )
        .subcommand(
            Command::new("solutions")
                .about("Produce solutions")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List solutions"))
                .subcommand(Command::new("show").about("Print one solution").arg(id_arg()))
                .subcommand(
                    Command::new("create")
                        .about("Create an empty solution")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("description").long("description").short('d')),
                )
                .subcommand(Command::new("delete").about("Delete a solution").arg(id_arg()))
                .subcommand(
                    Command::new("set")
                        .about("Change one value of a solution's data")
                        .arg(id_arg())
                        .arg(path_arg())
                        .arg(json_arg()),
                )
                .subcommand(Command::new("idols").about("Selectable idols")),
        )
        .subcommand(
            Command::new("options")
                .about("Option choices")
                .subcommand_required(true)
                .subcommand(Command::new("money-items").about("Money shop items"))
                .subcommand(Command::new("ap-items").about("AP shop items")),
        )
        .subcommand(
            Command::new("end-action")
                .about("What to do after all tasks finish")
                .arg(
                    Arg::new("action")
                        .required(true)
                        .value_parser(["do-nothing", "shutdown", "hibernate"]),
                ),
        )
        .subcommand(Command::new("watch").about("Follow the run board live until Ctrl-C"))
        .subcommand(Command::new("version").about("Backend version"))
        .subcommand(
            Command::new("update")
                .about("Backend updates")
                .subcommand_required(true)
                .subcommand(Command::new("versions").about("Installed and available versions"))
                .subcommand(Command::new("changelog").about("Print the changelog"))
                .subcommand(
                    Command::new("install")
                        .about("Install a version")
                        .arg(Arg::new("version").required(true)),
                ),
        )
        .subcommand(
            Command::new("report")
                .about("Bug reports and diagnostics")
                .subcommand_required(true)
                .subcommand(
                    Command::new("bug")
                        .about("File a bug report")
                        .arg(Arg::new("title").required(true))
                        .arg(Arg::new("description").required(true))
                        .arg(
                            Arg::new("upload")
                                .long("upload")
                                .action(ArgAction::SetTrue)
                                .help("Upload the report archive"),
                        ),
                )
                .subcommand(Command::new("list").about("Previous bug reports"))
                .subcommand(Command::new("logs").about("Download the log archive").arg(out_arg()))
                .subcommand(Command::new("dumps").about("Download the dump archive").arg(out_arg())),
        )
        .subcommand(
            Command::new("screen")
                .about("Screenshots")
                .subcommand_required(true)
                .subcommand(
                    Command::new("current")
                        .about("Current screen")
                        .arg(full_arg())
                        .arg(out_arg()),
                )
                .subcommand(
                    Command::new("last")
                        .about("Last recognized screen")
                        .arg(full_arg())
                        .arg(out_arg()),
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tree_is_consistent() {
        command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let m = command()
            .try_get_matches_from(["kaa", "quick", "show", "--base-url", "http://h:1", "-v"])
            .unwrap();
        assert_eq!(
            m.get_one::<String>("base-url").map(String::as_str),
            Some("http://h:1")
        );
        assert!(m.get_flag("verbose"));
    }

    #[test]
    fn test_rejects_unknown_end_action() {
        assert!(command()
            .try_get_matches_from(["kaa", "end-action", "reboot"])
            .is_err());
    }

    #[test]
    fn test_screen_requires_out() {
        assert!(command()
            .try_get_matches_from(["kaa", "screen", "current"])
            .is_err());
    }

    #[test]
    fn test_quick_set_parses_bool() {
        let m = command()
            .try_get_matches_from(["kaa", "quick", "set", "purchase", "true"])
            .unwrap();
        let (_, quick) = m.subcommand().unwrap();
        let (_, set) = quick.subcommand().unwrap();
        assert_eq!(set.get_one::<bool>("enabled"), Some(&true));
    }
}
