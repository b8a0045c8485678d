//! Curated runtime settings for well-known images

/// Runtime settings layered onto a generated config for a known repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    /// Exposed port, e.g. `5432/tcp`
    pub port: &'static str,
    /// Non-root user the image runs as
    pub user: &'static str,
    /// Named volume
    pub volume: &'static str,
    /// Extra environment
    pub env: &'static [&'static str],
    /// Entrypoint
    pub entrypoint: &'static [&'static str],
    /// Default command
    pub cmd: &'static [&'static str],
}

const POSTGRES: Preset = Preset {
    port: "5432/tcp",
    user: "postgres",
    volume: "/var/lib/postgresql/data",
    env: &["PGDATA=/var/lib/postgresql/data", "PG_MAJOR=16"],
    entrypoint: &["docker-entrypoint.sh"],
    cmd: &["postgres"],
};

const REDIS: Preset = Preset {
    port: "6379/tcp",
    user: "redis",
    volume: "/data",
    env: &["REDIS_VERSION=7.2.4"],
    entrypoint: &["docker-entrypoint.sh"],
    cmd: &["redis-server"],
};

const NGINX: Preset = Preset {
    port: "80/tcp",
    user: "nginx",
    volume: "/var/cache/nginx",
    env: &["NGINX_VERSION=1.25.4"],
    entrypoint: &["/docker-entrypoint.sh"],
    cmd: &["nginx", "-g", "daemon off;"],
};

/// Look up the preset for a repository name.
pub fn lookup(repository: &str) -> Option<&'static Preset> {
    match repository {
        "postgres" => Some(&POSTGRES),
        "redis" => Some(&REDIS),
        "nginx" => Some(&NGINX),
        _ => None,
    }
}
