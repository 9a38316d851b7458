//! 消息帧编解码
//!
//! 线上格式为长度前缀帧：4字节大端u32长度 + JSON编码的消息信封。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::models::Message;

/// 单帧最大字节数，超出视为协议错误
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// 写出一帧消息
pub async fn write_message<W>(writer: &mut W, message: &Message) -> SchedulerResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(SchedulerError::Protocol(format!(
            "消息帧过大: {} 字节",
            body.len()
        )));
    }

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// 读取一帧消息，对端正常关闭时返回None
pub async fn read_message<R>(reader: &mut R) -> SchedulerResult<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    // 长度前缀处的EOF表示连接正常关闭，帧中间截断才是协议错误
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_BYTES {
        return Err(SchedulerError::Protocol(format!("消息帧过大: {len} 字节")));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| SchedulerError::Protocol(format!("读取消息帧失败: {e}")))?;

    Ok(Some(serde_json::from_slice(&body)?))
}
