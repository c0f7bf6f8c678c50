use std::fmt::Display;
use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write one protocol reply line.
pub async fn respond_text<W: AsyncWrite + Unpin>(w: &mut W, text: &str) -> io::Result<()> {
    w.write_all(format!("{text}\n").as_bytes()).await
}

/// Write the success reply.
pub async fn respond_ok<W: AsyncWrite + Unpin>(w: &mut W) -> io::Result<()> {
    w.write_all(b"OK\n").await
}

/// Write a failure reply carrying a human-readable message.
pub async fn respond_error<W: AsyncWrite + Unpin>(
    w: &mut W,
    message: impl Display,
) -> io::Result<()> {
    w.write_all(format!("Error: {message}\n").as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_are_newline_terminated() {
        let mut buf = Vec::new();
        respond_text(&mut buf, "BYE!").await.unwrap();
        respond_ok(&mut buf).await.unwrap();
        respond_error(&mut buf, "boom").await.unwrap();
        assert_eq!(buf, b"BYE!\nOK\nError: boom\n");
    }
}
