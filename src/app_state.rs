use crate::cli::CommandLineArgs;
use crate::invoker::AlgorithmInvoker;
use crate::registry::AlgorithmRegistry;
use crate::resource_manager::ResourceManager;
use crate::store::UsageStore;

use std::path::PathBuf;
use std::sync::Arc;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Algorithm catalog.
    pub registry: AlgorithmRegistry,

    /// Usage data access.
    pub store: Arc<dyn UsageStore>,

    /// Algorithm process runner.
    pub invoker: AlgorithmInvoker,

    /// Resource manager.
    pub resource_manager: ResourceManager,

    // Directory for exchange files.
    pub exchange_dir: PathBuf,
}

impl AppState {
    /// Create and return an [AppState].
    pub fn new(args: &CommandLineArgs, store: Arc<dyn UsageStore>) -> Self {
        let process_limit = args.process_limit.or_else(|| Some(num_cpus::get()));
        Self {
            registry: AlgorithmRegistry::new(args.algorithm_dir.clone(), &args.algorithm_extensions),
            store,
            invoker: AlgorithmInvoker::from_args(args),
            resource_manager: ResourceManager::new(process_limit),
            exchange_dir: args.exchange_dir(),
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
