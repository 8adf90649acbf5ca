mod buffer;
mod policy;
mod shutdown;
mod signals;


use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::db::Database;
use crate::paths::session_db_path;
use crate::player::launch_player;
use crate::source::{ContentSource, Cursor, InstagramClient};

use self::buffer::{BufferManager, LoopTiming, SystemClock, Targets};
use self::policy::BackoffPolicy;
use self::shutdown::Shutdown;
use self::signals::TerminationSignals;

const SUPERVISOR_TICK: Duration = Duration::from_millis(200);

pub fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    config.apply_cli(&cli);
    config.validate()?;

    match cli.command {
        Some(Command::Watch) | None => run_watch(&config)?,
        Some(Command::Fetch { count }) => run_fetch(&config, count)?,
        Some(Command::Login) => run_login(&config)?,
        Some(Command::Logout) => run_logout(&config)?,
    }

    Ok(())
}

fn run_watch(config: &Config) -> Result<()> {
    let signals = TerminationSignals::install()?;
    let source = login(config)?;
    if signals.interrupted_during("login") {
        println!("Exiting reelstream...");
        return Ok(());
    }
    let (mut player, sink) = launch_player(&config.mpv_bin, &config.socket_path)?;

    let targets = Targets {
        forward: config.forward_target,
        backward: config.backward_target,
        fetch_count: config.fetch_count,
    };
    let mut manager = BufferManager::new(
        source,
        sink,
        SystemClock,
        targets,
        LoopTiming::with_poll_interval(config.poll_interval),
        BackoffPolicy::default(),
    );

    let filled = manager.initial_fill(config.initial_fill);
    if signals.interrupted_during("initial fill") {
        println!("Exiting reelstream...");
        player.shutdown(Some(manager.sink_mut()));
        return Ok(());
    }
    match filled {
        Ok(added) => println!("Loaded {added} reels."),
        Err(err) => {
            player.shutdown(Some(manager.sink_mut()));
            return Err(err);
        }
    }

    let shutdown = Shutdown::default();
    let loop_shutdown = shutdown.clone();
    let handle = thread::Builder::new()
        .name("buffer-manager".to_string())
        .spawn(move || {
            manager.run(&loop_shutdown);
            manager
        })
        .context("failed to start buffer manager thread")?;

    println!("reelstream running. Use mpv controls to navigate, Ctrl-C to quit.");
    loop {
        if signals.requested() {
            println!("Exiting reelstream...");
            break;
        }
        if player.has_exited() {
            println!("Player closed, exiting reelstream...");
            break;
        }
        thread::sleep(SUPERVISOR_TICK);
    }

    shutdown.trigger();
    let manager = handle
        .join()
        .map_err(|_| anyhow!("buffer manager thread panicked"))?;
    let (_, mut sink) = manager.into_parts();
    player.shutdown(Some(&mut sink));
    Ok(())
}

fn run_fetch(config: &Config, count: usize) -> Result<()> {
    let mut source = login(config)?;
    let page = source
        .fetch_page(&Cursor::Start, count)
        .context("failed to fetch reels")?;

    println!("Fetched {} reels", page.urls.len());
    for (idx, url) in page.urls.iter().enumerate() {
        println!("{}. {url}", idx + 1);
    }
    Ok(())
}

fn run_login(config: &Config) -> Result<()> {
    login(config)?;
    println!(
        "Session stored for {}.",
        config.username.as_deref().unwrap_or_default()
    );
    Ok(())
}

fn run_logout(config: &Config) -> Result<()> {
    let username = config
        .username
        .as_deref()
        .context("IGUSERNAME is not set; nothing to forget")?;
    let db = open_db()?;
    if db.clear_session(username)? {
        println!("Forgot stored session for {username}.");
    } else {
        println!("No stored session for {username}.");
    }
    Ok(())
}

fn login(config: &Config) -> Result<InstagramClient> {
    let credentials = config.credentials()?;
    let mut client = InstagramClient::new(credentials, &config.api_base, open_db()?);
    client.login().context("login failed")?;
    Ok(client)
}

fn open_db() -> Result<Database> {
    let db_path = session_db_path()?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}
