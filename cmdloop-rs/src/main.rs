use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cmdloop::cli::{self, CliArgs, ConfigFile};
use cmdloop::config::Config;
use cmdloop::{
    do_cmdline, BatchSource, ExecFlags, GenericSource, InteractiveSource, InterpState, LineSource,
    ScriptDispatcher, ScriptFileSource, StopReason,
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("cmdloop: {e}");
            eprintln!("{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    // ── Ctrl-C raises the interrupt flag; the loops notice at their next check ─
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupt);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt requested");
            flag.store(true, Ordering::SeqCst);
        }
    });

    // The engine is synchronous and blocks on stdin.
    match tokio::task::spawn_blocking(move || run(args, interrupt)).await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            eprintln!("cmdloop: {e:#}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("cmdloop: engine task failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs, interrupt: Arc<AtomicBool>) -> Result<ExitCode> {
    let config = load_config(&args.config)?;
    let prompt = config.prompt().to_owned();

    let mut state = InterpState::new(config.limits());
    state.set_interrupt_handle(interrupt);
    state.set_stepping(args.debug);
    state.set_debugger(Box::new(|| -> Box<dyn LineSource> {
        Box::new(InteractiveSource::stdio("debug> "))
    }));

    let mut flags = ExecFlags::empty();
    if args.verbose || config.verbose() {
        flags |= ExecFlags::VERBOSE;
    }
    if args.nowait {
        flags |= ExecFlags::NOWAIT;
    }

    let mut dispatcher = ScriptDispatcher::with_vars(config.vars);
    let mut ok = true;

    // ── Scripts, then -c ──────────────────────────────────────────────────────
    for script in &args.scripts {
        let source = ScriptFileSource::open(script)
            .with_context(|| format!("can't open script {}", script.display()))?;
        info!(path = %script.display(), "sourcing script");
        let flags = flags | ExecFlags::REPEAT;
        let t = do_cmdline(&mut state, Box::new(source), flags, &mut dispatcher)?;
        print_output(&mut dispatcher)?;
        ok &= t.is_success();
        if dispatcher.quit_requested() || t.reason == StopReason::Interrupted {
            return Ok(exit_code(ok));
        }
    }

    if let Some(cmd) = &args.command {
        let source = GenericSource::once(cmd.clone());
        let t = do_cmdline(&mut state, Box::new(source), flags, &mut dispatcher)?;
        print_output(&mut dispatcher)?;
        ok &= t.is_success();
        if dispatcher.quit_requested() {
            return Ok(exit_code(ok));
        }
    }

    // ── Input ─────────────────────────────────────────────────────────────────
    let stdin_is_tty = unsafe { libc::isatty(libc::STDIN_FILENO) != 0 };
    if args.batch || (!stdin_is_tty && args.scripts.is_empty() && args.command.is_none()) {
        let mut program = String::new();
        io::stdin().read_to_string(&mut program).context("reading stdin")?;
        let source = BatchSource::from_program("stdin", &program);
        let t = do_cmdline(
            &mut state,
            Box::new(source),
            flags | ExecFlags::REPEAT | ExecFlags::NOWAIT,
            &mut dispatcher,
        )?;
        print_output(&mut dispatcher)?;
        ok &= t.is_success();
        return Ok(exit_code(ok));
    }
    if !args.scripts.is_empty() || args.command.is_some() {
        return Ok(exit_code(ok));
    }

    // One outermost invocation per typed line, until end of input or `quit`.
    loop {
        let source = InteractiveSource::stdio(prompt.as_str());
        let t = do_cmdline(
            &mut state,
            Box::new(source),
            flags | ExecFlags::KEYTYPED | ExecFlags::KEEPLINE,
            &mut dispatcher,
        )?;
        print_output(&mut dispatcher)?;
        if dispatcher.quit_requested() || (t.dispatched == 0 && t.reason == StopReason::Completed) {
            break;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn load_config(choice: &ConfigFile) -> Result<Config> {
    let path = match choice {
        ConfigFile::Skip => return Ok(Config::new()),
        ConfigFile::Explicit(path) => path.clone(),
        ConfigFile::Search => match cli::find_user_config() {
            Some(path) => path,
            None => return Ok(Config::new()),
        },
    };
    let (config, errors) = Config::load_file(&path)
        .with_context(|| format!("can't read config {}", path.display()))?;
    for e in &errors {
        warn!(path = %path.display(), "{e}");
    }
    info!(path = %path.display(), vars = config.vars.len(), "config loaded");
    Ok(config)
}

fn print_output(dispatcher: &mut ScriptDispatcher) -> io::Result<()> {
    let mut out = io::stdout().lock();
    for line in dispatcher.take_output() {
        writeln!(out, "{line}")?;
    }
    out.flush()
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
