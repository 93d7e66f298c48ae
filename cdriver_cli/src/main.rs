extern crate cdriver_cli;
extern crate cdriver_core;
extern crate clap;
#[macro_use]
extern crate log;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{App, Arg, ArgMatches, SubCommand};

use cdriver_cli::diff::ColorDiff;
use cdriver_cli::load::load_project;
use cdriver_core::{orchestrator, Global, Registry};

fn main() {
    let matches = App::new("cdriver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Plan, apply and destroy infrastructure modules in dependency order.")
        .arg(Arg::with_name("verbose").short("v").multiple(true).help("Increase log verbosity"))
        .arg(
            Arg::with_name("file")
                .short("f")
                .long("file")
                .takes_value(true)
                .default_value("cdriver.yml")
                .help("Root project file"),
        )
        .arg(
            Arg::with_name("state")
                .long("state")
                .takes_value(true)
                .default_value("cdriver.state.json")
                .help("Path to the state document"),
        )
        .arg(
            Arg::with_name("max-parallel")
                .long("max-parallel")
                .takes_value(true)
                .default_value("4")
                .help("Maximum number of modules applied concurrently"),
        )
        .subcommand(SubCommand::with_name("plan").about("Shows pending changes without applying them").arg(
            Arg::with_name("show-terraform-plan")
                .long("show-terraform-plan")
                .help("Also run the downstream tool's own plan for modules whose dependencies are satisfied"),
        ))
        .subcommand(SubCommand::with_name("apply").about("Applies pending changes in dependency order"))
        .subcommand(
            SubCommand::with_name("destroy")
                .about("Destroys every deployed module")
                .arg(Arg::with_name("force").long("force").help("Destroy the desired project instead of the last-applied state")),
        )
        .get_matches();

    if let Err(e) = run(&matches) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> cdriver_cli::Result<()> {
    cdriver_cli::init_logger(matches.occurrences_of("verbose"))?;

    let working_dir = std::env::current_dir()?;
    let mut global = Global::new(&working_dir, parse_max_parallel(matches)?);
    global.state_file_name = working_dir.join(matches.value_of("state").unwrap());

    let root_file: PathBuf = working_dir.join(matches.value_of("file").unwrap());
    let mut registry = Registry::with_builtins();
    registry.register_module_kind(Box::new(cdriver_cli::modules::terraform_cli::Factory));
    let project = load_project(&root_file, &working_dir, &global.code_cache_dir, &registry)?;

    match matches.subcommand() {
        ("plan", Some(sub)) => {
            global.show_terraform_plan = sub.is_present("show-terraform-plan");
            let report = orchestrator::plan(&global, &registry, &project, &ColorDiff)?;
            if report.is_empty() {
                println!("no changes.");
            } else {
                print!("{}", report);
            }
        }
        ("apply", Some(_)) => {
            orchestrator::apply(&global, Arc::new(registry), Arc::new(project), Arc::new(ColorDiff))?;
        }
        ("destroy", Some(sub)) => {
            global.force = sub.is_present("force");
            orchestrator::destroy(&global, &registry, &project)?;
        }
        _ => {
            eprintln!("{}", matches.usage());
            process::exit(1);
        }
    }
    Ok(())
}

fn parse_max_parallel(matches: &ArgMatches) -> cdriver_cli::Result<usize> {
    matches
        .value_of("max-parallel")
        .unwrap()
        .parse()
        .map_err(|_| failure::err_msg("--max-parallel must be a positive integer"))
}
