//! 请求级上下文
//!
//! `CallContext` 不可变，派生新上下文只会在父节点之上追加一层，父上下文本身不受影响。

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use grpcutil_errors::ObservabilityError;
use tonic::metadata::MetadataMap;

/// 单次调用的作用域：方法名和开始时间
///
/// tag 阶段创建一次，handle 阶段读取一次。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallScope {
    method: String,
    start: Instant,
}

impl CallScope {
    /// 以当前时刻作为开始时间
    pub fn new(method: impl Into<String>) -> Self {
        Self::started_at(method, Instant::now())
    }

    pub fn started_at(method: impl Into<String>, start: Instant) -> Self {
        Self {
            method: method.into(),
            start,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn start(&self) -> Instant {
        self.start
    }
}

enum Entry {
    Scope(CallScope),
    Value(TypeId, Arc<dyn Any + Send + Sync>),
}

struct Node {
    parent: Option<Arc<Node>>,
    entry: Entry,
}

/// 请求级上下文
///
/// clone 只复制指针；`ptr_eq` 可以判断两个上下文是否是同一个值。
#[derive(Clone)]
pub struct CallContext {
    metadata: Arc<MetadataMap>,
    node: Option<Arc<Node>>,
}

impl CallContext {
    /// 以请求 metadata 作为根创建上下文
    pub fn new(metadata: MetadataMap) -> Self {
        Self {
            metadata: Arc::new(metadata),
            node: None,
        }
    }

    pub fn from_headers(headers: &http::HeaderMap) -> Self {
        Self::new(MetadataMap::from_headers(headers.clone()))
    }

    /// 取出请求扩展里的上下文，没有时以请求 metadata 新建一个
    pub fn from_request<T>(request: &tonic::Request<T>) -> Self {
        request
            .extensions()
            .get::<CallContext>()
            .cloned()
            .unwrap_or_else(|| Self::new(request.metadata().clone()))
    }

    fn derive(&self, entry: Entry) -> Self {
        Self {
            metadata: self.metadata.clone(),
            node: Some(Arc::new(Node {
                parent: self.node.clone(),
                entry,
            })),
        }
    }

    fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        std::iter::successors(self.node.as_deref(), |node| node.parent.as_deref())
    }

    /// 请求 metadata
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn with_scope(&self, scope: CallScope) -> Self {
        self.derive(Entry::Scope(scope))
    }

    /// 最近一次附加的调用作用域
    pub fn scope(&self) -> Option<&CallScope> {
        self.nodes().find_map(|node| match &node.entry {
            Entry::Scope(scope) => Some(scope),
            _ => None,
        })
    }

    pub fn require_scope(&self) -> Result<&CallScope, ObservabilityError> {
        self.scope().ok_or(ObservabilityError::MissingScope)
    }

    /// 附加一个按类型索引的值，同类型的旧值被遮蔽而不是被覆盖
    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) -> Self {
        self.derive(Entry::Value(TypeId::of::<T>(), Arc::new(value)))
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.nodes().find_map(|node| match &node.entry {
            Entry::Value(id, value) if *id == TypeId::of::<T>() => value.downcast_ref::<T>(),
            _ => None,
        })
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        let same_node = match (&a.node, &b.node) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            (None, None) => true,
            _ => false,
        };
        same_node && Arc::ptr_eq(&a.metadata, &b.metadata)
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(MetadataMap::new())
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("scope", &self.scope())
            .field("depth", &self.nodes().count())
            .finish()
    }
}
