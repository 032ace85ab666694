mod cli;
mod config;
mod database;
mod error;
mod excel;
mod filters;
mod flash;
mod handlers;
mod middleware;
mod models;
mod monitor;
mod state;
mod sync;
mod utils;
mod workflow;

use std::process::ExitCode;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use dotenvy::dotenv;
use tower::ServiceBuilder;
use tower_cookies::CookieManagerLayer;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use cli::{Cli, Command};
use config::Config;
use database::{create_database_pool, run_migrations};
use state::AppState;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    match run(cli.command.unwrap_or(Command::Serve)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let db = create_database_pool(&config.database_url).await?;
    run_migrations(&db).await?;

    match command {
        Command::Serve => serve(db, config).await?,
        Command::SetupRoles => cli::setup_roles(&db).await?,
        Command::CreateSuperuser { username, password } => {
            cli::create_superuser(&db, &username, &password).await?
        }
        Command::ImportOrderModels { path } => {
            let summary = cli::import_order_models_file(&db, &path).await?;
            println!("Order/model import finished: {}", summary.describe());
        }
        Command::ImportMaterialDetails { path, qty_col } => {
            let summary = cli::import_material_details_file(&db, &config, &path, &qty_col).await?;
            println!("Material details import finished: {}", summary.describe());
        }
        Command::ImportInventory { path } => {
            let summary = cli::import_inventory_file(&db, &path).await?;
            println!("Inventory import finished: {}", summary.describe());
        }
        Command::Monitor => monitor::run_once(&db, &config).await,
    }
    Ok(())
}

async fn serve(db: database::Database, config: Config) -> std::io::Result<()> {
    let addr = config.bind_addr();
    let app = create_router(AppState::new(db, config));

    log::info!("material requisition server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

fn create_router(state: AppState) -> Router {
    use handlers::{
        api, auth, inventory, master_data, material_lists, requisitions, specifications, stocktakes,
        users, work_orders,
    };

    let media_root = state.config.media_root.clone();

    Router::new()
        .route("/", get(handlers::home))
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/logout", post(auth::logout))

        // Requisitions
        .route(
            "/requisitions",
            get(requisitions::requisition_list).post(requisitions::create_requisition),
        )
        .route("/requisitions/history", get(requisitions::requisition_history))
        .route("/requisitions/new", get(requisitions::create_form))
        .route("/requisitions/export", get(requisitions::export_requisitions))
        .route("/requisitions/export-pending", get(requisitions::export_pending_materials))
        .route("/requisitions/:id", get(requisitions::requisition_detail))
        .route("/requisitions/:id/delete", post(requisitions::delete_requisition))
        .route("/requisitions/:id/images", post(requisitions::upload_images))

        // Material list versions
        .route(
            "/requisitions/:id/upload-materials",
            get(material_lists::upload_form).post(material_lists::upload_materials),
        )
        .route(
            "/requisitions/:id/confirmation",
            get(material_lists::confirmation_page).post(material_lists::save_confirmation),
        )
        .route(
            "/requisitions/:id/confirmation/export",
            get(material_lists::export_confirmation),
        )
        .route(
            "/requisitions/:id/sign-off",
            get(material_lists::sign_off_page).post(material_lists::sign_off),
        )
        .route(
            "/requisitions/:id/sign-off/:version_id",
            get(material_lists::sign_off_version_page).post(material_lists::sign_off_version),
        )
        .route(
            "/requisitions/:id/versions/:version_id/activate",
            post(material_lists::activate_version),
        )
        .route(
            "/requisitions/:id/supplement",
            get(material_lists::supplement_page).post(material_lists::supplement),
        )

        // Dispatch
        .route(
            "/requisitions/:id/dispatch-note",
            get(work_orders::dispatch_note).post(work_orders::update_dispatch_note),
        )
        .route("/requisitions/:id/backorder-note", get(work_orders::backorder_note))
        .route(
            "/requisitions/:id/backorder-note/export",
            get(work_orders::export_backorder_note),
        )
        .route(
            "/requisitions/:id/work-order-images",
            post(work_orders::upload_work_order_images),
        )

        // Work orders
        .route("/work-orders", get(work_orders::work_order_list))
        .route("/work-orders/export", get(work_orders::export_work_order_materials))
        .route("/work-orders/update-quantities", post(work_orders::update_quantities))
        .route(
            "/work-orders/import-to-requisition",
            post(work_orders::import_to_requisition),
        )
        .route("/work-orders/shortage", get(work_orders::shortage_list))

        // JSON API
        .route("/api/process-types", get(api::get_process_types_for_model))
        .route(
            "/api/process-types/available",
            get(api::get_available_process_types),
        )
        .route("/api/requisitions/:id", get(api::get_requisition_details))
        .route("/api/requisitions/:id/items", get(api::get_requisition_items))
        .route("/api/requisitions/:id/images", get(api::get_requisition_images))
        .route(
            "/api/requisitions/:id/dispatch-status",
            post(work_orders::update_dispatch_status),
        )
        .route(
            "/api/requisitions/:id/versions/:version_id/items/:item_id/sign-off",
            post(material_lists::sign_off_item),
        )
        .route(
            "/api/work-order-materials/:id/process-type",
            post(api::update_material_process_type),
        )
        .route("/api/inventory/count", post(inventory::update_counted_quantity))

        // Master data
        .route("/master-data", get(master_data::index))
        .route("/master-data/order-models", post(master_data::upload_order_models))
        .route("/master-data/material-details", post(master_data::upload_material_details))
        .route("/master-data/stock", post(master_data::upload_stock))
        .route("/master-data/storage-bins", post(master_data::upload_storage_bins))
        .route(
            "/master-data/process-type-workbook",
            get(master_data::view_process_type_workbook)
                .post(master_data::upload_process_type_workbook),
        )
        .route("/master-data/work-orders", get(master_data::view_work_order_database))
        .route(
            "/master-data/work-orders/clear",
            post(master_data::clear_work_order_database),
        )
        .route("/master-data/inventory", get(master_data::view_inventory_database))
        .route(
            "/master-data/process-types",
            get(master_data::process_types_page).post(master_data::manage_process_type),
        )

        // Inventory and stocktaking
        .route("/inventory", get(inventory::dashboard))
        .route(
            "/inventory/update",
            get(inventory::update_page).post(inventory::import_master),
        )
        .route("/inventory/stocktake", get(inventory::stocktake_locations))
        .route("/inventory/stocktake/:location", get(inventory::location_count_page))
        .route("/inventory/differences", get(inventory::difference_locations))
        .route("/inventory/differences/:location", get(inventory::difference_detail))
        .route(
            "/inventory/differences/:location/export",
            get(inventory::export_location_differences),
        )
        .route("/inventory/materials", get(inventory::material_list))
        .route(
            "/inventory/materials/update-quantities",
            post(inventory::update_quantities),
        )
        .route("/inventory/materials/create-stocktake", post(inventory::create_stocktake))
        .route(
            "/inventory/materials/export-differences",
            get(inventory::export_master_differences),
        )
        .route(
            "/inventory/materials/:id/images",
            get(inventory::material_images).post(inventory::upload_material_images),
        )
        .route("/inventory/stocktakes", get(stocktakes::stocktake_list))
        .route(
            "/inventory/stocktakes/:id",
            get(stocktakes::stocktake_detail).post(stocktakes::stocktake_actions),
        )
        .route(
            "/inventory/stocktakes/:id/export",
            get(stocktakes::export_stocktake_differences),
        )

        // Specifications
        .route("/specifications", get(specifications::spec_list))
        .route("/specifications/lookup", post(specifications::lookup))
        .route("/specifications/import", post(specifications::import_specs))
        .route(
            "/specifications/:id/edit",
            get(specifications::edit_page).post(specifications::save_spec),
        )

        // User management
        .route("/users", get(users::users_list).post(users::create_user))
        .route("/users/new", get(users::new_user_form))
        .route("/users/:id", post(users::update_user))
        .route("/users/:id/edit", get(users::edit_user_form))
        .route("/users/:id/lock", post(users::lock_user))
        .route("/users/:id/unlock", post(users::unlock_user))
        .route("/users/:id/delete", post(users::delete_user))

        // Static files and uploads
        .nest_service("/static", ServeDir::new("static"))
        .nest_service("/media", ServeDir::new(media_root))

        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CookieManagerLayer::new())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .with_state(state)
}
