use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;
use compiler::{CompilerConfiguration, Phase};
use kestrel::{Shell, ShellError, with_program_stack};
use runtime::{Runtime, RuntimeConfig};

const EXIT_COMPILE_ERROR: i32 = 1;
const EXIT_UNCAUGHT: i32 = 2;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Source files to run in order
    #[arg(required = false, help = "The .kst files to run")]
    files: Vec<PathBuf>,

    /// Print disassembled classes instead of running
    #[arg(long, help = "Dump generated bytecode for inputs")]
    dump_bytecode: bool,

    /// Stop after this phase (1-9) and run nothing
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=9))]
    phase: Option<u8>,

    /// Write a disassembly listing per generated class here
    #[arg(long)]
    target_dir: Option<PathBuf>,

    /// Run this text as a script
    #[arg(short = 'e', long = "eval")]
    script: Option<String>,

    /// Receiver shapes a call site caches before going megamorphic
    #[arg(long, default_value_t = RuntimeConfig::default().polymorphic_limit)]
    polymorphic_limit: usize,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match with_program_stack(move || run(cli)) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error starting program thread: {err}");
            process::exit(EXIT_UNCAUGHT);
        }
    }
}

/// Everything below runs on the program thread. Returns the exit code.
fn run(cli: Cli) -> i32 {
    let config = CompilerConfiguration {
        target_directory: cli.target_dir.clone(),
        ..CompilerConfiguration::default()
    };
    let runtime = Runtime::new(RuntimeConfig {
        polymorphic_limit: cli.polymorphic_limit,
        ..RuntimeConfig::default()
    });
    let shell = Shell::new(config, runtime);
    let through = cli.phase.and_then(Phase::from_number).unwrap_or(Phase::LAST);

    let mut inputs: Vec<(String, Input)> = cli
        .files
        .iter()
        .map(|path| (path.display().to_string(), Input::File(path.clone())))
        .collect();
    if let Some(text) = &cli.script {
        inputs.push(("script_from_command_line.kst".into(), Input::Text(text.clone())));
    }
    if inputs.is_empty() {
        eprintln!("Nothing to run. Pass source files or -e SCRIPT.");
        return EXIT_COMPILE_ERROR;
    }

    for (name, input) in &inputs {
        let compiled = match input {
            Input::File(path) => shell.compile_file(path, through),
            Input::Text(text) => shell.compile_str(name, text, through),
        };
        let classes = match compiled {
            Ok(classes) => classes,
            Err(err) => return report(name, &err),
        };
        if cli.dump_bytecode {
            println!("== {name} ==");
            for class in &classes {
                println!("{}", class.disassemble());
            }
            continue;
        }
        if through != Phase::LAST {
            log::info!("{name}: compiled through {through}");
            continue;
        }
        let result = shell.load(classes).and_then(|script| match script {
            Some(script) => Ok(shell.runtime().interpreter().run_script(&script)?),
            None => Ok(runtime::Value::Null),
        });
        if let Err(err) = result {
            return report(name, &err);
        }
    }
    0
}

enum Input {
    File(PathBuf),
    Text(String),
}

fn report(name: &str, err: &ShellError) -> i32 {
    match err {
        ShellError::Compile { rendered, .. } => {
            eprintln!("{rendered}");
            EXIT_COMPILE_ERROR
        }
        ShellError::Runtime(e) => {
            eprintln!("Caught: {e}");
            eprintln!("\tin {name}");
            EXIT_UNCAUGHT
        }
        ShellError::Thread(e) => {
            eprintln!("Error: {e}");
            EXIT_UNCAUGHT
        }
    }
}
