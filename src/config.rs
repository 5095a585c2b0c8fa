use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TIMEOUT_MS: u64 = 180_000;
const DEFAULT_MEMORY_STORE_CAPACITY: u64 = 10_000;
/// 终态任务记录的保留时长（秒），0 表示不过期。
const DEFAULT_TASK_RESULT_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub timeout_ms: u64,
    pub proxy: String,
    pub debug: String,

    /// 客户端访问网关所需的 Bearer Token（逗号分隔），为空则不鉴权。
    pub api_tokens: Vec<String>,

    pub gitee_tokens: Vec<String>,
    pub modelscope_tokens: Vec<String>,
    pub huggingface_tokens: Vec<String>,

    pub kv_rest_api_url: String,
    pub kv_rest_api_token: String,
    pub redis_url: String,
    pub kv_file_dir: String,
    pub memory_store_capacity: u64,

    pub task_result_ttl_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "PORT")]
    port: Option<u16>,

    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY")]
    proxy: Option<String>,
    #[serde(alias = "DEBUG")]
    debug: Option<String>,

    #[serde(alias = "API_TOKEN")]
    api_token: Option<String>,

    #[serde(alias = "GITEE_TOKENS")]
    gitee_tokens: Option<String>,
    #[serde(alias = "MODELSCOPE_TOKENS")]
    modelscope_tokens: Option<String>,
    #[serde(alias = "HUGGINGFACE_TOKENS")]
    huggingface_tokens: Option<String>,

    #[serde(alias = "KV_REST_API_URL")]
    kv_rest_api_url: Option<String>,
    #[serde(alias = "KV_REST_API_TOKEN")]
    kv_rest_api_token: Option<String>,
    #[serde(alias = "REDIS_URL")]
    redis_url: Option<String>,
    #[serde(alias = "KV_FILE_DIR")]
    kv_file_dir: Option<String>,
    #[serde(alias = "MEMORY_STORE_CAPACITY")]
    memory_store_capacity: Option<u64>,

    #[serde(alias = "TASK_RESULT_TTL")]
    task_result_ttl: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawEnv::default())
    }
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        let mut cfg = Self::from_raw(raw);

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    fn from_raw(raw: RawEnv) -> Self {
        Self {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: raw.port.unwrap_or(DEFAULT_PORT),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy: raw.proxy.unwrap_or_default(),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
            api_tokens: parse_token_list(raw.api_token.as_deref()),
            gitee_tokens: parse_token_list(raw.gitee_tokens.as_deref()),
            modelscope_tokens: parse_token_list(raw.modelscope_tokens.as_deref()),
            huggingface_tokens: parse_token_list(raw.huggingface_tokens.as_deref()),
            kv_rest_api_url: raw.kv_rest_api_url.unwrap_or_default(),
            kv_rest_api_token: raw.kv_rest_api_token.unwrap_or_default(),
            redis_url: raw.redis_url.unwrap_or_default(),
            kv_file_dir: raw.kv_file_dir.unwrap_or_default(),
            memory_store_capacity: raw
                .memory_store_capacity
                .unwrap_or(DEFAULT_MEMORY_STORE_CAPACITY),
            task_result_ttl_secs: raw.task_result_ttl.unwrap_or(DEFAULT_TASK_RESULT_TTL_SECS),
        }
    }

    /// 指定 provider 配置的上游 Token 列表（保持配置顺序）。
    pub fn provider_tokens(&self, provider: &str) -> Vec<String> {
        match provider {
            "gitee" => self.gitee_tokens.clone(),
            "modelscope" => self.modelscope_tokens.clone(),
            "huggingface" => self.huggingface_tokens.clone(),
            _ => Vec::new(),
        }
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }
}

/// 逗号分隔的 Token 列表：去空白、丢弃空项，保持顺序。
pub fn parse_token_list(value: Option<&str>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_dotenv() {
    let Some(dotenv_path) = find_dotenv_path() else {
        return;
    };

    let Ok(file) = std::fs::File::open(&dotenv_path) else {
        return;
    };

    let reader = std::io::BufReader::new(file);
    for line in std::io::BufRead::lines(reader).map_while(Result::ok) {
        let Some((key, value)) = parse_dotenv_line(&line) else {
            continue;
        };
        // 进程环境变量优先，.env 只补缺。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：修改进程环境变量在并发场景下可能触发 UB，因此 API 为 unsafe。
        // 这里在启动阶段加载 .env，且未并发访问环境变量，符合使用前提。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }

        // 避免跨越仓库根目录：发现 Cargo.toml 或 .git 即停止向上寻找。
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }

        let parent = dir.parent()?;
        if parent == dir {
            break;
        }
        dir = parent;
    }

    None
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let mut line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix("export ") {
        line = rest.trim_start();
    }

    let eq_idx = line.find('=')?;
    let key = line[..eq_idx].trim();
    if key.is_empty() {
        return None;
    }

    let raw = line[eq_idx + 1..].trim();
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }

    Some((key.to_string(), strip_inline_comment(raw).trim().to_string()))
}

fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] != b'#' {
            continue;
        }
        if i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t' {
            return value[..i].trim_end();
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_list_trims_and_drops_empty_items() {
        assert_eq!(
            parse_token_list(Some(" a, b ,,c ,")),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_token_list(Some("  ")).is_empty());
        assert!(parse_token_list(None).is_empty());
    }

    #[test]
    fn parse_dotenv_line_handles_quotes_comments_and_export() {
        assert_eq!(
            parse_dotenv_line("export GITEE_TOKENS=\"a,b\""),
            Some(("GITEE_TOKENS".to_string(), "a,b".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("PORT=3000 # 端口"),
            Some(("PORT".to_string(), "3000".to_string()))
        );
        assert_eq!(
            parse_dotenv_line("REDIS_URL=redis://h:1/0#frag"),
            Some(("REDIS_URL".to_string(), "redis://h:1/0#frag".to_string()))
        );
        assert_eq!(parse_dotenv_line("# comment"), None);
        assert_eq!(parse_dotenv_line("=novalue"), None);
    }

    #[test]
    fn provider_tokens_maps_known_providers_only() {
        let mut cfg = Config::default();
        cfg.gitee_tokens = vec!["g1".to_string()];
        cfg.huggingface_tokens = vec!["h1".to_string(), "h2".to_string()];

        assert_eq!(cfg.provider_tokens("gitee"), vec!["g1".to_string()]);
        assert_eq!(cfg.provider_tokens("huggingface").len(), 2);
        assert!(cfg.provider_tokens("modelscope").is_empty());
        assert!(cfg.provider_tokens("unknown").is_empty());
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.task_result_ttl_secs, DEFAULT_TASK_RESULT_TTL_SECS);
        assert!(cfg.api_tokens.is_empty());
    }
}
