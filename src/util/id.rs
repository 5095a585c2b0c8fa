use uuid::Uuid;

/// 上游 seed 的取值上限（i32::MAX），与各 provider 的接口约定一致。
const MAX_SEED: u64 = 2_147_483_647;

pub fn request_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

/// 未指定 seed 时随机生成一个 `[0, 2147483647)` 内的值。
pub fn random_seed() -> u64 {
    random_u64() % MAX_SEED
}

fn random_u64() -> u64 {
    // 复用 UUID v4 的随机源，避免额外引入 rand/getrandom 依赖。
    let b = *Uuid::new_v4().as_bytes();
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
