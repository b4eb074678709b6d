//! Webhook 命令网关主入口
//! 外部代理经 HMAC 签名的 webhook 调用第三方服务，凭据由令牌代理托管

use std::sync::Arc;
use sylo_gateway::{
    auth::JwtVerifier,
    config::AppConfig,
    db,
    handlers::health,
    integrations::{ExecutorRegistry, HttpTokenBroker, TokenBroker},
    middleware::AppState,
    ratelimit::{InMemoryStore, RateLimiter},
    repository::{PgAuditRepository, PgConnectionRepository},
    routes,
    services::{AuditService, CommandDispatcher, ConnectionService, ContextCompiler},
    telemetry,
};
use secrecy::ExposeSecret;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("sylo-gateway {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env.development > .env
    // 生产环境应该直接设置环境变量，不依赖 .env 文件
    if let Ok(path) = std::env::var("SYLO_ENV") {
        dotenv::from_filename(format!(".env.{}", path)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    // 设置应用启动时间
    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Sylo gateway starting...");

    // 3. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 4. 构建应用状态
    let audit_store = Arc::new(PgAuditRepository::new(db_pool.clone()));
    let connection_store = Arc::new(PgConnectionRepository::new(db_pool.clone()));

    // 令牌代理客户端与执行器注册表（启动时校验动作表）
    let broker: Arc<dyn TokenBroker> = Arc::new(HttpTokenBroker::new(&config.broker)?);
    let registry = Arc::new(ExecutorRegistry::new(
        broker,
        config.context.receivables_alert_threshold,
    ));

    let audit_service = Arc::new(AuditService::new(audit_store));
    let dispatcher = Arc::new(CommandDispatcher::new(registry.clone()));
    let context_compiler = Arc::new(ContextCompiler::new(connection_store.clone(), registry));
    let connection_service = Arc::new(ConnectionService::new(connection_store));

    // 进程内限流存储只对单实例部署正确；
    // 多实例部署需将 InMemoryStore 换成共享的外部计数器实现
    let rate_limiter = Arc::new(RateLimiter::new(
        Arc::new(InMemoryStore::new()),
        config
            .security
            .rate_limit_bypass_token
            .as_ref()
            .map(|t| t.expose_secret().clone()),
    ));

    let jwt_verifier = Arc::new(JwtVerifier::from_config(&config));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db: db_pool,
        audit_service,
        dispatcher,
        context_compiler,
        connection_service,
        rate_limiter,
        jwt_verifier,
    });

    // 5. 构建路由
    let app = routes::create_router(app_state);

    // 6. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        "Server listening"
    );

    // 7. 优雅关闭
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    // 超时后强制关闭
    tokio::time::sleep(tokio::time::Duration::from_secs(timeout_secs)).await;
    tracing::warn!("Graceful shutdown timeout reached, forcing exit");
}

/// 打印帮助信息
fn print_help() {
    println!("sylo-gateway {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: sylo-gateway [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过环境变量完成（前缀 SYLO_）");
    println!("  可用选项请参考 .env.example");
}
