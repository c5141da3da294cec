//! Command-line subcommands and their handlers.

use crate::api::types::{CartItem, SaleData};
use crate::app::App;
use crate::cache::{CacheResult, CacheSource};
use crate::queue::{format_time_ago, PendingSale, PendingStatus, RetryReport, SubmitOutcome};
use clap::{Args, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Record sales
  #[command(subcommand)]
  Sale(SaleCommand),
  /// Inspect and edit the offline sale queue
  #[command(subcommand)]
  Queue(QueueCommand),
  /// Send pending sales now
  Sync,
  /// Send pending sales whenever the connection comes back
  Watch,
  /// List customers
  Customers {
    /// Ignore the cached list
    #[arg(long)]
    refresh: bool,
  },
  /// List products for the configured location
  Products {
    /// Ignore the cached list
    #[arg(long)]
    refresh: bool,
  },
  /// Inspect and clear the local list cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum SaleCommand {
  /// Submit a sale; it is queued if the backend can't be reached
  Submit(SaleArgs),
}

#[derive(Args, Debug)]
pub struct SaleArgs {
  /// Cart line as VARIANT_ID[:QUANTITY]; repeat for more lines
  #[arg(long = "item", required = true, value_parser = parse_cart_item)]
  items: Vec<CartItem>,

  #[arg(long, default_value = "CASH")]
  payment_method: String,

  #[arg(long)]
  payment_status: Option<String>,

  #[arg(long)]
  customer: Option<String>,

  #[arg(long)]
  discount: Option<f64>,

  #[arg(long)]
  cash_drawer: Option<String>,

  #[arg(long)]
  notes: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum QueueCommand {
  /// Show pending sales
  List {
    /// Include other tenants' sales
    #[arg(long)]
    all: bool,
  },
  /// Drop one pending sale without sending it
  Remove { id: String },
  /// Drop every pending sale of the tenant
  Clear,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Show cached lists and when they expire
  Status,
  /// Drop cached lists
  Invalidate {
    #[arg(value_enum, default_value_t = CacheTarget::All)]
    target: CacheTarget,
  },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTarget {
  Customers,
  Products,
  All,
}

/// Parse `VARIANT_ID[:QUANTITY]`
fn parse_cart_item(s: &str) -> std::result::Result<CartItem, String> {
  let (variant_id, quantity) = match s.rsplit_once(':') {
    Some((id, qty)) => {
      let qty = qty
        .parse::<u32>()
        .map_err(|_| format!("invalid quantity '{}'", qty))?;
      (id, qty)
    }
    None => (s, 1),
  };

  if variant_id.is_empty() {
    return Err("missing variant id".to_string());
  }
  if quantity == 0 {
    return Err("quantity must be at least 1".to_string());
  }

  Ok(CartItem {
    variant_id: variant_id.to_string(),
    quantity,
  })
}

pub async fn run(app: &App, command: Command) -> Result<()> {
  match command {
    Command::Sale(SaleCommand::Submit(args)) => submit_sale(app, args).await,
    Command::Queue(cmd) => queue(app, cmd),
    Command::Sync => {
      let report = app.sync_now().await;
      print_report(&report);
      Ok(())
    }
    Command::Watch => app.watch().await,
    Command::Customers { refresh } => list_customers(app, refresh).await,
    Command::Products { refresh } => list_products(app, refresh).await,
    Command::Cache(cmd) => cache(app, cmd),
  }
}

async fn submit_sale(app: &App, args: SaleArgs) -> Result<()> {
  let location = app
    .config()
    .location
    .clone()
    .ok_or_else(|| eyre!("No location configured. Set `location` or pass --location."))?;

  let sale = SaleData {
    cart_items: args.items,
    location_id: location,
    customer_id: args.customer,
    payment_method: args.payment_method,
    payment_status: args.payment_status,
    discount_amount: args.discount,
    cash_drawer_id: args.cash_drawer,
    notes: args.notes,
    enable_stock_tracking: app.config().sales.enable_stock_tracking,
  };
  sale.validate()?;

  match app.sync().submit(app.tenant(), sale).await? {
    SubmitOutcome::Submitted(created) => match created.id {
      Some(id) => println!("Sale created: {}", id),
      None => println!("Sale created"),
    },
    SubmitOutcome::Queued(pending) => println!("Sale queued: {}", pending.id),
  }
  Ok(())
}

fn queue(app: &App, cmd: QueueCommand) -> Result<()> {
  match cmd {
    QueueCommand::List { all } => {
      let sales = if all {
        app.queue().all()
      } else {
        app.queue().pending(app.tenant())
      };
      print_pending(app, &sales, all);
    }
    QueueCommand::Remove { id } => {
      if app.queue().dequeue(&id)? == 0 {
        return Err(eyre!("No pending sale with id {}", id));
      }
      println!("Removed {}", id);
    }
    QueueCommand::Clear => {
      let ids: Vec<String> = app
        .queue()
        .pending(app.tenant())
        .into_iter()
        .map(|s| s.id)
        .collect();
      let removed = app.queue().dequeue_many(&ids)?;
      println!("Removed {} pending sale(s)", removed);
    }
  }
  Ok(())
}

fn print_pending(app: &App, sales: &[PendingSale], with_tenant: bool) {
  if sales.is_empty() {
    println!("No pending sales");
    return;
  }

  let now = app.clock().now();
  for sale in sales {
    let age = sale
      .timestamp()
      .map(|t| format_time_ago(t, now))
      .unwrap_or_else(|| "-".to_string());
    let status = match sale.status() {
      PendingStatus::Created => "new".to_string(),
      PendingStatus::Retrying(n) => format!("retry {}/{}", n, app.sync().policy().max_attempts),
    };
    let items: u32 = sale.payload.cart_items.iter().map(|i| i.quantity).sum();

    if with_tenant {
      print!("{:<16} ", sale.tenant_id);
    }
    println!(
      "{:<32} {:<10} {:<12} {:>3} item(s)  {}",
      sale.id, age, status, items, sale.payload.payment_method
    );
  }
  println!("{} pending sale(s)", sales.len());
}

fn print_report(report: &RetryReport) {
  if report.skipped_in_flight {
    println!("A sync is already running");
    return;
  }
  if report.attempted == 0 {
    println!("Nothing to sync");
    return;
  }

  println!(
    "Sent {}: {} synced, {} will be retried, {} dropped",
    report.attempted,
    report.synced.len(),
    report.retrying.len(),
    report.exhausted.len()
  );
  if !report.untouched.is_empty() {
    println!("{} not acknowledged, kept as is", report.untouched.len());
  }
  if let Some(error) = &report.batch_error {
    println!("Error: {}", error);
  }
}

fn describe_source<T>(app: &App, result: &CacheResult<T>) -> String {
  match (result.source, result.cached_at) {
    (CacheSource::Cache, Some(at)) => {
      format!("cached {}", format_time_ago(at, app.clock().now()))
    }
    _ => "fresh".to_string(),
  }
}

async fn list_customers(app: &App, refresh: bool) -> Result<()> {
  let result = app.client().customers(app.tenant(), refresh).await?;

  for customer in &result.data {
    println!(
      "{:<28} {:<32} {}",
      customer.id,
      customer.name,
      customer.email.as_deref().unwrap_or("")
    );
  }
  println!(
    "{} customer(s) ({})",
    result.data.len(),
    describe_source(app, &result)
  );
  Ok(())
}

async fn list_products(app: &App, refresh: bool) -> Result<()> {
  let location = app.config().location.as_deref();
  let result = app
    .client()
    .products(app.tenant(), location, refresh)
    .await?;

  for product in result.data.iter().filter(|p| p.is_active) {
    println!(
      "{:<28} {:<32} {:<16} {} variant(s)",
      product.id,
      product.name,
      product.sku.as_deref().unwrap_or(""),
      product.variants.len()
    );
  }
  println!(
    "{} product(s) ({})",
    result.data.len(),
    describe_source(app, &result)
  );
  Ok(())
}

fn cache(app: &App, cmd: CacheCommand) -> Result<()> {
  let client = app.client();
  match cmd {
    CacheCommand::Status => {
      let entries = client.cache_entries(app.tenant());
      if entries.is_empty() {
        println!("Nothing cached for {}", app.tenant());
        return Ok(());
      }

      let now = app.clock().now();
      for entry in entries {
        let left = entry.expires_at - now;
        println!(
          "{:<40} {:>5} record(s)  stored {:<10} expires in {}h{:02}m",
          entry.key,
          entry.len,
          format_time_ago(entry.stored_at, now),
          left.num_hours(),
          left.num_minutes() % 60
        );
      }
    }
    CacheCommand::Invalidate { target } => {
      let tenant = app.tenant();
      let removed = match target {
        CacheTarget::Customers => client.invalidate_customers(tenant),
        CacheTarget::Products => client.invalidate_products(tenant),
        CacheTarget::All => client.invalidate_tenant(tenant),
      };
      println!("Removed {} cached list(s)", removed);
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct Cli {
    #[command(subcommand)]
    command: Command,
  }

  #[test]
  fn test_parse_cart_item() {
    let item = parse_cart_item("var_1:3").unwrap();
    assert_eq!(item.variant_id, "var_1");
    assert_eq!(item.quantity, 3);

    assert_eq!(parse_cart_item("var_1").unwrap().quantity, 1);
    assert!(parse_cart_item("var_1:0").is_err());
    assert!(parse_cart_item("var_1:x").is_err());
    assert!(parse_cart_item(":2").is_err());
  }

  #[test]
  fn test_sale_submit_args() {
    let cli = Cli::try_parse_from([
      "possync", "sale", "submit", "--item", "v1:2", "--item", "v2", "--payment-method", "CARD",
    ])
    .unwrap();

    let Command::Sale(SaleCommand::Submit(args)) = cli.command else {
      panic!("expected sale submit");
    };
    assert_eq!(args.items.len(), 2);
    assert_eq!(args.items[0].quantity, 2);
    assert_eq!(args.payment_method, "CARD");
  }

  #[test]
  fn test_sale_submit_requires_items() {
    assert!(Cli::try_parse_from(["possync", "sale", "submit"]).is_err());
  }

  #[test]
  fn test_cache_invalidate_defaults_to_all() {
    let cli = Cli::try_parse_from(["possync", "cache", "invalidate"]).unwrap();
    assert!(matches!(
      cli.command,
      Command::Cache(CacheCommand::Invalidate {
        target: CacheTarget::All
      })
    ));
  }
}
