//! gRPC 反射辅助工具

pub use tonic_reflection::server::Builder;
pub use tonic_reflection::server::v1::{ServerReflection, ServerReflectionServer};

/// 构建一个包含指定文件描述符集的反射服务
///
/// 反射服务自身的描述符总是包含在内，传空列表也能得到可用的服务。
pub fn build_reflection(
    file_descriptor_sets: &[&'static [u8]],
) -> Result<ServerReflectionServer<impl ServerReflection>, tonic_reflection::server::Error> {
    file_descriptor_sets
        .iter()
        .fold(Builder::configure(), |builder, fds| {
            builder.register_encoded_file_descriptor_set(*fds)
        })
        .build_v1()
}
