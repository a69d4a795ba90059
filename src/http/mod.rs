// HTTP 层 - 服务器、路由、中间件

pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{create_app, CrmHttpServer, HttpServerState};
