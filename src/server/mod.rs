pub mod http2;
pub mod http_server;
pub mod request_handler;
pub mod response;
pub mod routing;
pub mod static_files;
pub mod tls;

pub use http2::Http2Handler;
pub use http_server::HttpServer;
pub use request_handler::RequestHandler;
pub use response::{ErrorResponse, ResponseBuilder};
pub use routing::{RouteTarget, RoutingTable};
pub use static_files::StaticFileHandler;
pub use tls::TlsManager;
