use clap::{Parser, Subcommand};
use localstore::config::CONFIG;
use localstore::service::{Collection, LocalStoreHelper, describe};
use localstore::types::{
    PRODUCTS_COLLECTION, Priority, Product, SHOP_DATABASE, TASKS_COLLECTION, TASKS_DATABASE, Task,
    USERS_COLLECTION, User,
};
use localstore::RecordId;
use mimalloc::MiMalloc;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "localstore", version, about = "Local record store for tasks, users and products")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage to-do items")]
    Tasks {
        #[command(subcommand)]
        command: TaskCommand,
    },

    #[command(about = "Manage users of the shop database")]
    Users {
        #[command(subcommand)]
        command: UserCommand,
    },

    #[command(about = "Manage products of the shop database")]
    Products {
        #[command(subcommand)]
        command: ProductCommand,
    },

    #[command(about = "Show the collections of an existing database")]
    Collections { database: String },
}

#[derive(Subcommand)]
enum TaskCommand {
    Add {
        title: String,
        #[arg(long, default_value = "medium")]
        priority: Priority,
    },
    List,
    Delete { id: RecordId },
}

#[derive(Subcommand)]
enum UserCommand {
    Add { name: String, age: u32 },
    List,
    Delete { id: RecordId },
}

#[derive(Subcommand)]
enum ProductCommand {
    Add { name: String, price: f64 },
    List,
    Delete { id: RecordId },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cfg = &*CONFIG;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    info!(
        data_dir = %cfg.data_dir.display(),
        loglevel = %cfg.loglevel,
        max_connections = cfg.max_connections
    );

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Tasks { command } => {
            let store = LocalStoreHelper::new(TASKS_DATABASE, TASKS_COLLECTION);
            let handle = store.open().await?;
            match command {
                TaskCommand::Add { title, priority } => {
                    let task = Task::new(title, priority);
                    task.validate()?;
                    let id = store.add(&task).await?;
                    println!("task added: {id}");
                }
                TaskCommand::List => {
                    print_all::<Task>(&handle.collection(TASKS_COLLECTION)).await?;
                }
                TaskCommand::Delete { id } => {
                    store.delete_by_id(id).await?;
                    println!("task deleted: {id}");
                }
            }
        }
        Commands::Users { command } => {
            let users = open_shop().await?.collection(USERS_COLLECTION).await?;
            match command {
                UserCommand::Add { name, age } => {
                    let user = User::new(name, age);
                    user.validate()?;
                    let id = users.add(&user).await?;
                    println!("user added: {id}");
                }
                UserCommand::List => print_all::<User>(&users).await?,
                UserCommand::Delete { id } => {
                    users.delete_by_id(id).await?;
                    println!("user deleted: {id}");
                }
            }
        }
        Commands::Products { command } => {
            let products = open_shop().await?.collection(PRODUCTS_COLLECTION).await?;
            match command {
                ProductCommand::Add { name, price } => {
                    let product = Product::new(name, price);
                    product.validate()?;
                    let id = products.add(&product).await?;
                    println!("product added: {id}");
                }
                ProductCommand::List => print_all::<Product>(&products).await?,
                ProductCommand::Delete { id } => {
                    products.delete_by_id(id).await?;
                    println!("product deleted: {id}");
                }
            }
        }
        Commands::Collections { database } => {
            let summary = describe(&database, &CONFIG).await?;
            let version = summary
                .version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{} (version {version})", summary.database);
            for (name, count) in summary.collections {
                println!("  {name}\t{count}");
            }
        }
    }
    Ok(())
}

async fn open_shop() -> Result<LocalStoreHelper, Box<dyn std::error::Error>> {
    let store = LocalStoreHelper::with_collections(
        SHOP_DATABASE,
        [USERS_COLLECTION, PRODUCTS_COLLECTION],
    );
    store.open().await?;
    Ok(store)
}

async fn print_all<T>(collection: &Collection) -> Result<(), Box<dyn std::error::Error>>
where
    T: DeserializeOwned + Display,
{
    let records = collection.list_all().await?;
    if records.is_empty() {
        println!("(no records in {})", collection.name());
        return Ok(());
    }
    for record in records {
        let item: T = record.decode()?;
        println!("{}\t{item}", record.id);
    }
    Ok(())
}
