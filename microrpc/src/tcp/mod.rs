mod tcp_connector;
pub use tcp_connector::TcpConnector;

pub use tokio::net::TcpStream;
