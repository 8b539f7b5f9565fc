//! 标识符生成
//!
//! - 运行时实例与事件使用 UUID v4
//! - 事件订阅使用短的 62 进制随机 ID，便于在日志中阅读

use rand::Rng;

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 短 ID 长度
pub const SHORT_ID_LENGTH: usize = 10;

/// 生成 10 位 62 进制短 ID
///
/// ```
/// use asyncmc_core::utils::id::generate_short_id;
///
/// let id = generate_short_id();
/// assert_eq!(id.len(), 10);
/// ```
pub fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    (0..SHORT_ID_LENGTH)
        .map(|_| BASE62_CHARS[rng.gen_range(0..BASE62_CHARS.len())] as char)
        .collect()
}

/// 生成 UUID v4 字符串
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
