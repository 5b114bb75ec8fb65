//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use agilevault_crypto_core::totp;
use agilevault_keychain::{CacheFile, CacheUpdate, Field, Item, Keychain, VaultError, CACHE_FILE};
use anyhow::{anyhow, bail, Context};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::{password, Cli, Commands};

const MASK: &str = "********";

pub fn run(cli: &Cli) -> anyhow::Result<()> {
    let vault = cli
        .vault
        .clone()
        .context("no vault given; pass --vault or set AGILEVAULT_VAULT")?;

    match &cli.command {
        Commands::List { json } => {
            let keychain = open_loaded(&vault, cli.password_stdin)?;
            list(&keychain, *json)
        }
        Commands::Show { item, reveal } => {
            let keychain = open_loaded(&vault, cli.password_stdin)?;
            show(find_item(&keychain, item)?, *reveal);
            Ok(())
        }
        Commands::Totp { item } => {
            let keychain = open_loaded(&vault, cli.password_stdin)?;
            totp_codes(find_item(&keychain, item)?)
        }
        Commands::Remember { companion } => remember(cli, &vault, companion),
        Commands::UnlockAll => unlock_all(cli, &vault),
    }
}

fn cache_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    if let Some(path) = &cli.cache_file {
        return Ok(path.clone());
    }
    dirs::cache_dir()
        .map(|dir| dir.join("agilevault").join(CACHE_FILE))
        .context("no cache directory on this platform; pass --cache-file")
}

/// Unlock `path`, collapsing every unlock failure into one message.
fn open(path: &Path, password: &SecretString) -> anyhow::Result<Keychain> {
    Keychain::open(path, password.expose_secret().as_bytes()).map_err(|e| {
        if e.is_unlock_failure() {
            anyhow!("{}: {}", path.display(), e.user_message())
        } else {
            anyhow::Error::new(e).context(format!("could not open {}", path.display()))
        }
    })
}

fn open_loaded(path: &Path, password_stdin: bool) -> anyhow::Result<Keychain> {
    let password = password::read("Master", password_stdin)?;
    let mut keychain = open(path, &password)?;
    let report = keychain
        .reload()
        .with_context(|| format!("could not read the contents of {}", path.display()))?;
    for failure in &report.failures {
        eprintln!("warning: item {} skipped: {}", failure.uuid, failure.error);
    }
    Ok(keychain)
}

fn find_item<'a>(keychain: &'a Keychain, query: &str) -> anyhow::Result<&'a Item> {
    if let Some(item) = keychain.item(query) {
        return Ok(item);
    }
    let mut matches = keychain.search(query);
    let Some(first) = matches.next() else {
        bail!("no item matches {query:?}");
    };
    let rest: Vec<&Item> = matches.collect();
    if rest.is_empty() {
        return Ok(first);
    }
    let titles: Vec<String> = std::iter::once(first)
        .chain(rest)
        .map(|i| format!("{} ({})", i.title, i.uuid))
        .collect();
    bail!("{query:?} matches several items: {}", titles.join(", "))
}

fn list(keychain: &Keychain, as_json: bool) -> anyhow::Result<()> {
    let mut items: Vec<&Item> = keychain.items().collect();
    items.sort_by_key(|i| i.title.to_lowercase());

    if as_json {
        let rows: Vec<_> = items
            .iter()
            .map(|i| json!({"uuid": i.uuid, "title": i.title, "category": i.category}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for item in items {
        println!(
            "{}  {}  {}",
            item.uuid,
            item.title,
            item.category.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn show(item: &Item, reveal: bool) {
    println!("{}", item.title);
    if let Some(category) = &item.category {
        println!("  category: {category}");
    }
    for url in &item.urls {
        println!("  url: {url}");
    }
    for (section, fields) in &item.sections {
        if !section.is_empty() {
            println!("  [{section}]");
        }
        for field in fields {
            println!("  {}: {}", field.name, display_value(field, reveal));
        }
    }
    if !item.notes.is_empty() {
        println!("  notes:");
        for line in item.notes.lines() {
            println!("    {line}");
        }
    }
}

fn display_value(field: &Field, reveal: bool) -> String {
    if field.is_otp_uri() {
        return match totp::current_code(&field.value) {
            Ok(code) => format!("{code} (one-time code)"),
            Err(e) => format!("<{e}>"),
        };
    }
    if field.is_concealed && !reveal {
        MASK.to_string()
    } else {
        field.value.clone()
    }
}

fn totp_codes(item: &Item) -> anyhow::Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before 1970")?
        .as_secs();

    let mut found = false;
    for field in item.fields().filter(|f| f.is_otp_uri()) {
        found = true;
        match totp::parse_uri(&field.value) {
            Ok(params) => println!(
                "{}: {} ({}s left)",
                field.name,
                totp::compute(&params, now),
                totp::seconds_remaining(&params, now)
            ),
            Err(e) => eprintln!("{}: {e}", field.name),
        }
    }
    if !found {
        bail!("{} has no one-time password fields", item.title);
    }
    Ok(())
}

fn remember(cli: &Cli, master_path: &Path, companion: &Path) -> anyhow::Result<()> {
    let cache_path = cache_path(cli)?;
    let mut cache = CacheFile::load(&cache_path)?;

    let master_password = password::read("Master", cli.password_stdin)?;
    let master = open(master_path, &master_password)?;
    let master_key = master_path.display().to_string();
    if cache.master_vault.is_none() {
        cache.remember_password(&master, &master_key, master_password.expose_secret())?;
    } else if !cache.is_master(&master_key) {
        bail!(
            "{} is not the master vault of {}",
            master_path.display(),
            cache_path.display()
        );
    }

    let companion_password = password::read("Companion", cli.password_stdin)?;
    open(companion, &companion_password)?.lock();
    let update = cache.remember_password(
        &master,
        &companion.display().to_string(),
        companion_password.expose_secret(),
    )?;
    cache.save(&cache_path)?;

    match update {
        CacheUpdate::Stored => println!("cached password for {}", companion.display()),
        CacheUpdate::IsMaster | CacheUpdate::BecameMaster => {
            println!("{} is the master vault; nothing to cache", companion.display());
        }
    }
    master.lock();
    Ok(())
}

fn unlock_all(cli: &Cli, master_path: &Path) -> anyhow::Result<()> {
    let cache_path = cache_path(cli)?;
    let cache = CacheFile::load(&cache_path)?;
    if !cache.is_master(&master_path.display().to_string()) {
        bail!(
            "{} is not the master vault of {}",
            master_path.display(),
            cache_path.display()
        );
    }

    let master_password = password::read("Master", cli.password_stdin)?;
    let master = open(master_path, &master_password)?;

    let mut failed = 0usize;
    for companion in cache.cached_vaults() {
        match unlock_companion(&cache, &master, companion) {
            Ok(items) => println!("{companion}: unlocked, {items} items"),
            Err(e) => {
                failed = failed.saturating_add(1);
                eprintln!("{companion}: {e:#}");
            }
        }
    }
    master.lock();
    if failed > 0 {
        bail!("{failed} cached vault(s) could not be unlocked");
    }
    Ok(())
}

fn unlock_companion(cache: &CacheFile, master: &Keychain, path: &str) -> anyhow::Result<usize> {
    let password = cache
        .recall_password(master, path)?
        .ok_or_else(|| VaultError::NotFound(format!("cached password for {path}")))?;
    let mut keychain = open(Path::new(path), &password)?;
    let report = keychain.reload()?;
    keychain.lock();
    Ok(report.loaded)
}
