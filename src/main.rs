use sentria::analyze::Analyzer;
use sentria::config::Config;
use sentria::embed::EmbeddingClient;
use sentria::llm::ChatClient;
use sentria::metrics::PipelineMetrics;
use sentria::persist::GraphPersister;
use sentria::pipeline::{AlertProcessor, Scheduler};
use sentria::plan::Planner;
use sentria::retrieve::HybridRetriever;
use sentria::store::{GraphStore, Neo4jGraphStore, OpenSearchVectorStore, VectorStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("sentria v{} starting", sentria::version());

    let config = Config::from_env();

    let vector: Arc<dyn VectorStore> = match OpenSearchVectorStore::new(
        config.vector_store.clone(),
        config.embedding.dimension,
    ) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to build the alert index adapter");
            std::process::exit(1);
        }
    };

    let graph = match Neo4jGraphStore::new(config.graph_store.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "failed to build the graph store adapter");
            std::process::exit(1);
        }
    };

    let embedder = match EmbeddingClient::new(config.embedding.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "failed to build the embedding client");
            std::process::exit(1);
        }
    };

    let llm = match ChatClient::new(config.llm.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "failed to build the chat client");
            std::process::exit(1);
        }
    };

    // Startup probes: the vector store is required, the graph store is not.
    if let Err(e) = vector.ping().await {
        warn!(error = %e, "alert index unreachable at startup, first tick will retry");
    } else if let Err(e) = vector.ensure_index_template().await {
        warn!(error = %e, "index template install failed, first tick will retry");
    }

    if graph.probe().await {
        if let Err(e) = graph.ensure_schema().await {
            warn!(error = %e, "graph schema setup failed");
        }
    }

    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline_config = config.pipeline.clone();

    let retriever = HybridRetriever::new(
        Arc::clone(&vector),
        graph.clone() as Arc<dyn GraphStore>,
        pipeline_config.clone(),
        config.vector_store.timeout,
        config
            .graph_store
            .as_ref()
            .map(|g| g.timeout)
            .unwrap_or(std::time::Duration::from_secs(30)),
        Arc::clone(&metrics),
    );

    let processor = Arc::new(AlertProcessor::new(
        embedder,
        Planner::new(pipeline_config.knn_k),
        retriever,
        Analyzer::new(llm),
        GraphPersister::new(graph.clone() as Arc<dyn GraphStore>, pipeline_config.clone()),
        Arc::clone(&vector),
        Arc::clone(&metrics),
    ));

    let scheduler = Scheduler::new(
        processor,
        Arc::clone(&vector),
        pipeline_config,
        Arc::clone(&metrics),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, finishing current tick");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await;

    let snapshot = metrics.snapshot();
    info!(
        ticks = snapshot.ticks,
        enriched = snapshot.alerts_enriched,
        partial = snapshot.alerts_partial,
        failed = snapshot.alerts_failed,
        "sentria stopped"
    );
}
