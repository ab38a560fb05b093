//! Pennywise CLI - monthly summaries, group balances and notifications from
//! the terminal.
//!
//! Usage:
//!   pennywise signup [email]
//!   pennywise login [email]
//!   pennywise logout
//!   pennywise whoami
//!   pennywise summary [YYYY-MM] [CURRENCY]
//!   pennywise add <amount> <category> [description]
//!   pennywise limit <amount> [YYYY-MM] [CURRENCY]
//!   pennywise groups
//!   pennywise balances <group-id> [CURRENCY]
//!   pennywise invite <group-id> <email>
//!   pennywise notifications

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pennywise_core::balance::settle_up;
use pennywise_core::models::{NewExpense, Period};
use pennywise_core::utils::{currency, format_amount, format_date, format_signed, month_label, truncate_string};
use pennywise_core::{AppContext, Config, NoticeLevel, Notifier, SessionData, StoreConfig};

/// Width of the description column in listings
const DESCRIPTION_WIDTH: usize = 32;

/// Prints user notices to stderr, next to the command output.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Success => eprintln!("ok: {}", message),
            NoticeLevel::Error => eprintln!("error: {}", message),
        }
    }
}

/// Initialize the tracing subscriber for logging
///
/// Logs go to stderr, filtered by RUST_LOG (default `warn`), and to a daily
/// rolling file in the cache directory when it can be created.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = AppContext::log_dir()
        .ok()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .map(|dir| tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "pennywise.log")));

    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("summary");
    if matches!(command, "-h" | "--help" | "help") {
        print_usage();
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load config")?;
    config.apply_env();
    let ctx = AppContext::new(&config, &StoreConfig::default(), Arc::new(ConsoleNotifier))?;
    info!(command = command, "Pennywise starting");

    match command {
        "signup" => signup(&ctx, &mut config, args.get(1).map(String::as_str)).await,
        "login" => login(&ctx, &mut config, args.get(1).map(String::as_str)).await,
        "logout" => logout(&ctx).await,
        "whoami" => {
            require_session(&ctx).await?;
            let (user_id, email) = ctx.api.get_user().await.context("Failed to look up user")?;
            println!("{} ({})", email, user_id);
            Ok(())
        }
        "summary" => {
            let session = require_session(&ctx).await?;
            summary(&ctx, &session, args.get(1).map(String::as_str), args.get(2).map(String::as_str)).await
        }
        "add" => {
            let session = require_session(&ctx).await?;
            let (Some(amount), Some(category)) = (args.get(1), args.get(2)) else {
                bail!("Usage: pennywise add <amount> <category> [description]");
            };
            let description = args[3.min(args.len())..].join(" ");
            add_expense(&ctx, &session, amount, category, &description).await
        }
        "limit" => {
            let session = require_session(&ctx).await?;
            let amount = args.get(1).context("Usage: pennywise limit <amount> [YYYY-MM] [CURRENCY]")?;
            set_limit(&ctx, &session, amount, args.get(2).map(String::as_str), args.get(3).map(String::as_str)).await
        }
        "groups" => {
            let session = require_session(&ctx).await?;
            groups(&ctx, &session).await
        }
        "balances" => {
            let session = require_session(&ctx).await?;
            let group_id = args.get(1).context("Usage: pennywise balances <group-id> [CURRENCY]")?;
            balances(&ctx, &session, group_id, args.get(2).map(String::as_str)).await
        }
        "invite" => {
            let session = require_session(&ctx).await?;
            let (Some(group_id), Some(email)) = (args.get(1), args.get(2)) else {
                bail!("Usage: pennywise invite <group-id> <email>");
            };
            ctx.groups
                .invite(group_id, &session.user_id, &session.email, email)
                .await?;
            Ok(())
        }
        "notifications" => {
            let session = require_session(&ctx).await?;
            notifications(&ctx, &session).await
        }
        other => {
            print_usage();
            bail!("Unknown command: {}", other)
        }
    }
}

fn print_usage() {
    println!("Usage:");
    println!("  pennywise signup [email]");
    println!("  pennywise login [email]");
    println!("  pennywise logout");
    println!("  pennywise whoami");
    println!("  pennywise summary [YYYY-MM] [CURRENCY]");
    println!("  pennywise add <amount> <category> [description]");
    println!("  pennywise limit <amount> [YYYY-MM] [CURRENCY]");
    println!("  pennywise groups");
    println!("  pennywise balances <group-id> [CURRENCY]");
    println!("  pennywise invite <group-id> <email>");
    println!("  pennywise notifications");
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Email from the argument, `PENNYWISE_EMAIL` or a prompt (offering the last
/// one used), and the password from `PENNYWISE_PASSWORD` or a hidden prompt.
fn credentials(config: &Config, email_arg: Option<&str>) -> Result<(String, String)> {
    let email = match email_arg
        .map(str::to_string)
        .or_else(|| std::env::var("PENNYWISE_EMAIL").ok())
    {
        Some(email) => email,
        None => match config.last_email.as_deref() {
            Some(last) => {
                let entered = prompt(&format!("Email [{}]: ", last))?;
                if entered.is_empty() {
                    last.to_string()
                } else {
                    entered
                }
            }
            None => prompt("Email: ")?,
        },
    };
    let password = match std::env::var("PENNYWISE_PASSWORD") {
        Ok(p) if !p.is_empty() => p,
        _ => rpassword::prompt_password("Password: ")?,
    };
    if email.is_empty() || password.is_empty() {
        bail!("Email and password required");
    }
    Ok((email, password))
}

fn remember_email(config: &mut Config, email: String) {
    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

async fn signup(ctx: &AppContext, config: &mut Config, email_arg: Option<&str>) -> Result<()> {
    let (email, password) = credentials(config, email_arg)?;
    let session = ctx
        .session
        .sign_up(&ctx.api, &email, &password)
        .await
        .context("Sign-up failed")?;
    remember_email(config, email);
    match session {
        Some(session) => println!("Account created, signed in as {}", session.email),
        None => println!("Account created. Confirm your email, then run `pennywise login`."),
    }
    Ok(())
}

async fn login(ctx: &AppContext, config: &mut Config, email_arg: Option<&str>) -> Result<()> {
    let (email, password) = credentials(config, email_arg)?;
    let session = ctx.sign_in(&email, &password).await.context("Sign-in failed")?;
    remember_email(config, email);
    println!("Signed in as {}", session.email);
    Ok(())
}

async fn logout(ctx: &AppContext) -> Result<()> {
    if ctx.restore_session().await?.is_none() {
        println!("Not signed in");
        return Ok(());
    }
    ctx.sign_out().await;
    println!("Signed out");
    Ok(())
}

async fn require_session(ctx: &AppContext) -> Result<SessionData> {
    match ctx.restore_session().await? {
        Some(session) => Ok(session),
        None => bail!("Not signed in. Run `pennywise login` first."),
    }
}

fn parse_month(arg: Option<&str>) -> Result<NaiveDate> {
    match arg {
        None => {
            let today = Utc::now().date_naive();
            NaiveDate::from_ymd_opt(today.year(), today.month(), 1).context("Invalid current date")
        }
        Some(s) => NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
            .with_context(|| format!("Invalid month '{}', expected YYYY-MM", s)),
    }
}

async fn summary(
    ctx: &AppContext,
    session: &SessionData,
    month: Option<&str>,
    currency_arg: Option<&str>,
) -> Result<()> {
    let first_day = parse_month(month)?;
    let code = currency_arg
        .unwrap_or(currency::DEFAULT_CURRENCY)
        .to_uppercase();
    let period = Period::of(first_day, code.clone());

    if let Err(e) = ctx.sync.on_user_changed(Some(&session.user_id)).await {
        eprintln!("warning: {}", e);
    }
    ctx.group_totals.fetch(&session.user_id, &period, false).await;

    println!("{}  ({})", month_label(first_day), code);
    println!("{}", "-".repeat(40));
    println!("Spent:        {}", format_amount(ctx.expenses.monthly_total(&period), &code));

    match ctx.limits.usage(&session.user_id, &period).await {
        Ok(Some(usage)) => {
            println!(
                "Limit:        {} ({:.0}% used{})",
                format_amount(usage.limit, &code),
                usage.percent,
                if usage.exceeded() { ", exceeded" } else { "" }
            );
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Could not load monthly limit"),
    }

    if let Some((category_id, amount)) = ctx.expenses.top_category(&period) {
        println!(
            "Top category: {} ({})",
            ctx.categories.name_of(&category_id),
            format_amount(amount, &code)
        );
    }

    let by_category = ctx.expenses.category_totals(&period);
    if !by_category.is_empty() {
        println!("\nBy category:");
        for (category_id, amount) in by_category {
            println!(
                "  {:<24} {:>14}",
                truncate_string(&ctx.categories.name_of(&category_id), 24),
                format_amount(amount, &code)
            );
        }
    }

    if let Some(totals) = ctx.group_totals.total(&period) {
        if !totals.groups.is_empty() {
            println!("\nShared in groups: {}", format_amount(totals.total, &code));
            for g in &totals.groups {
                println!("  {:<24} {:>14}", truncate_string(&g.group_name, 24), format_amount(g.total, &code));
            }
        }
    }

    let recent: Vec<_> = ctx
        .expenses
        .expenses()
        .into_iter()
        .filter(|e| e.in_period(&period))
        .take(10)
        .collect();
    if !recent.is_empty() {
        println!("\nRecent:");
        for e in recent {
            println!(
                "  {}  {:<width$} {:>14}",
                format_date(e.date),
                truncate_string(&e.description, DESCRIPTION_WIDTH),
                format_amount(e.amount, &e.currency),
                width = DESCRIPTION_WIDTH
            );
        }
    }

    let others: Vec<String> = ctx
        .expenses
        .currencies()
        .into_iter()
        .filter(|c| *c != code)
        .collect();
    if !others.is_empty() {
        println!("\nAlso recorded in: {}", others.join(", "));
    }
    Ok(())
}

async fn add_expense(
    ctx: &AppContext,
    session: &SessionData,
    amount: &str,
    category_name: &str,
    description: &str,
) -> Result<()> {
    let amount: f64 = amount
        .parse()
        .with_context(|| format!("Invalid amount '{}'", amount))?;
    ctx.sync.on_user_changed(Some(&session.user_id)).await?;
    let Some(category) = ctx.categories.find_by_name(category_name) else {
        let known: Vec<String> = ctx.categories.categories().into_iter().map(|c| c.name).collect();
        bail!("Unknown category '{}'. Known: {}", category_name, known.join(", "));
    };

    let currency_code = std::env::var("PENNYWISE_CURRENCY")
        .ok()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| currency::DEFAULT_CURRENCY.to_string())
        .to_uppercase();
    let expense = ctx
        .expenses
        .add(NewExpense {
            amount,
            description: description.to_string(),
            date: Utc::now().date_naive(),
            category_id: category.id,
            user_id: session.user_id.clone(),
            group_id: None,
            currency: currency_code,
            paid_by: None,
        })
        .await?;
    println!(
        "{}  {}  {}",
        format_date(expense.date),
        category.name,
        format_amount(expense.amount, &expense.currency)
    );
    Ok(())
}

async fn set_limit(
    ctx: &AppContext,
    session: &SessionData,
    amount: &str,
    month: Option<&str>,
    currency_arg: Option<&str>,
) -> Result<()> {
    let amount: f64 = amount
        .parse()
        .with_context(|| format!("Invalid amount '{}'", amount))?;
    let first_day = parse_month(month)?;
    let code = currency_arg
        .unwrap_or(currency::DEFAULT_CURRENCY)
        .to_uppercase();
    let period = Period::of(first_day, code.clone());
    let limit = ctx.limits.set(&session.user_id, &period, amount).await?;
    println!(
        "Limit for {}: {}",
        month_label(first_day),
        format_amount(limit.amount, &code)
    );
    Ok(())
}

async fn groups(ctx: &AppContext, session: &SessionData) -> Result<()> {
    let groups = ctx.groups.list_groups(&session.user_id).await?;
    if groups.is_empty() {
        println!("You are not in any group");
        return Ok(());
    }
    for g in groups {
        let role = if g.is_creator(&session.user_id) { " (owner)" } else { "" };
        println!("{}  {}{}", g.id, g.name, role);
    }
    Ok(())
}

async fn balances(
    ctx: &AppContext,
    session: &SessionData,
    group_id: &str,
    currency_arg: Option<&str>,
) -> Result<()> {
    let details = ctx.groups.group_details(group_id).await?;
    let expenses = ctx.groups.shared_expenses(group_id).await?;
    let currencies = expenses.currencies();
    let code = match currency_arg {
        Some(c) => c.to_uppercase(),
        None => currencies
            .first()
            .cloned()
            .unwrap_or_else(|| currency::DEFAULT_CURRENCY.to_string()),
    };

    let balances = ctx.groups.balances(group_id, &code).await?;
    println!("{}  ({})", details.group.name, code);
    println!("{}", "-".repeat(40));
    for b in &balances {
        let you = if b.user_id == session.user_id { " (you)" } else { "" };
        println!("  {:<28} {:>14}", format!("{}{}", truncate_string(&b.email, 28 - you.len()), you), format_signed(b.balance, &code));
    }

    let transfers = settle_up(&balances);
    if !transfers.is_empty() {
        let name = |id: &str| {
            balances
                .iter()
                .find(|b| b.user_id == id)
                .map(|b| b.email.clone())
                .unwrap_or_else(|| id.to_string())
        };
        println!("\nTo settle up:");
        for t in transfers {
            println!("  {} pays {} {}", name(&t.from_user), name(&t.to_user), format_amount(t.amount, &code));
        }
    }
    if currencies.len() > 1 {
        println!("\nOther currencies: {}", currencies.join(", "));
    }
    Ok(())
}

async fn notifications(ctx: &AppContext, session: &SessionData) -> Result<()> {
    let list = ctx.notifications.list(&session.user_id).await?;
    if list.is_empty() {
        println!("No notifications");
        return Ok(());
    }
    for n in &list {
        let marker = if n.read { " " } else { "*" };
        println!(
            "{} {}  {}: {}",
            marker,
            n.created_at.format("%b %d"),
            n.title,
            n.message
        );
    }
    let pending = ctx.groups.pending_invitations(&session.email).await?;
    if !pending.is_empty() {
        println!("\n{} pending invitation(s)", pending.len());
    }
    ctx.notifications.mark_all_read(&session.user_id).await?;
    Ok(())
}
