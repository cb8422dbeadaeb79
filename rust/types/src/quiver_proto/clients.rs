//! Client stubs for the peer services the query coordinator talks to.
//!
//! Kept in the shape tonic codegen produces so a future switch to build-time
//! generation is a drop-in; only the knobs we actually use are carried.

/// Client for the query node worker service.
pub mod query_node_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct QueryNodeClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl QueryNodeClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> QueryNodeClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::Body>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn load_segments(
            &mut self,
            request: impl tonic::IntoRequest<super::super::LoadSegmentsRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/LoadSegments");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "LoadSegments"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn release_segments(
            &mut self,
            request: impl tonic::IntoRequest<super::super::ReleaseSegmentsRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/ReleaseSegments");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "ReleaseSegments"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn watch_dm_channels(
            &mut self,
            request: impl tonic::IntoRequest<super::super::WatchDmChannelsRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/WatchDmChannels");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "WatchDmChannels"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn watch_delta_channels(
            &mut self,
            request: impl tonic::IntoRequest<super::super::WatchDeltaChannelsRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/WatchDeltaChannels");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "WatchDeltaChannels"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn add_query_channel(
            &mut self,
            request: impl tonic::IntoRequest<super::super::AddQueryChannelRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/AddQueryChannel");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "AddQueryChannel"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn release_collection(
            &mut self,
            request: impl tonic::IntoRequest<super::super::ReleaseCollectionRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/ReleaseCollection");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "ReleaseCollection"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn release_partitions(
            &mut self,
            request: impl tonic::IntoRequest<super::super::ReleasePartitionsRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/ReleasePartitions");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "ReleasePartitions"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn get_segment_info(
            &mut self,
            request: impl tonic::IntoRequest<super::super::GetSegmentInfoRequest>,
        ) -> std::result::Result<tonic::Response<super::super::GetSegmentInfoResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/GetSegmentInfo");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "GetSegmentInfo"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn get_metrics(
            &mut self,
            request: impl tonic::IntoRequest<super::super::GetMetricsRequest>,
        ) -> std::result::Result<tonic::Response<super::super::GetMetricsResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/quiver.proto.QueryNode/GetMetrics");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.QueryNode", "GetMetrics"));
            self.inner.unary(req, path, codec).await
        }
    }
}

/// Client for the root coordinator.
pub mod root_coord_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct RootCoordClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl RootCoordClient<tonic::transport::Channel> {
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> RootCoordClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::Body>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn show_partitions(
            &mut self,
            request: impl tonic::IntoRequest<super::super::ShowPartitionsRequest>,
        ) -> std::result::Result<tonic::Response<super::super::ShowPartitionsResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.RootCoord/ShowPartitions");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.RootCoord", "ShowPartitions"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn release_dql_message_stream(
            &mut self,
            request: impl tonic::IntoRequest<super::super::ReleaseDqlMessageStreamRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/quiver.proto.RootCoord/ReleaseDqlMessageStream",
            );
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "quiver.proto.RootCoord",
                "ReleaseDqlMessageStream",
            ));
            self.inner.unary(req, path, codec).await
        }

        pub async fn alloc_id(
            &mut self,
            request: impl tonic::IntoRequest<super::super::AllocIdRequest>,
        ) -> std::result::Result<tonic::Response<super::super::AllocIdResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/quiver.proto.RootCoord/AllocId");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.RootCoord", "AllocId"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn alloc_timestamp(
            &mut self,
            request: impl tonic::IntoRequest<super::super::AllocTimestampRequest>,
        ) -> std::result::Result<tonic::Response<super::super::AllocTimestampResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.RootCoord/AllocTimestamp");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.RootCoord", "AllocTimestamp"));
            self.inner.unary(req, path, codec).await
        }
    }
}

/// Client for the data coordinator.
pub mod data_coord_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct DataCoordClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl DataCoordClient<tonic::transport::Channel> {
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> DataCoordClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::Body>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn get_recovery_info(
            &mut self,
            request: impl tonic::IntoRequest<super::super::GetRecoveryInfoRequest>,
        ) -> std::result::Result<tonic::Response<super::super::GetRecoveryInfoResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.DataCoord/GetRecoveryInfo");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.DataCoord", "GetRecoveryInfo"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn acquire_segment_lock(
            &mut self,
            request: impl tonic::IntoRequest<super::super::AcquireSegmentLockRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.DataCoord/AcquireSegmentLock");
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "quiver.proto.DataCoord",
                "AcquireSegmentLock",
            ));
            self.inner.unary(req, path, codec).await
        }

        pub async fn release_segment_lock(
            &mut self,
            request: impl tonic::IntoRequest<super::super::ReleaseSegmentLockRequest>,
        ) -> std::result::Result<tonic::Response<super::super::Status>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.DataCoord/ReleaseSegmentLock");
            let mut req = request.into_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "quiver.proto.DataCoord",
                "ReleaseSegmentLock",
            ));
            self.inner.unary(req, path, codec).await
        }

        pub async fn get_segment_states(
            &mut self,
            request: impl tonic::IntoRequest<super::super::GetSegmentStatesRequest>,
        ) -> std::result::Result<tonic::Response<super::super::GetSegmentStatesResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.DataCoord/GetSegmentStates");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.DataCoord", "GetSegmentStates"));
            self.inner.unary(req, path, codec).await
        }
    }
}

/// Client for the index coordinator.
pub mod index_coord_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::wildcard_imports)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct IndexCoordClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl IndexCoordClient<tonic::transport::Channel> {
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }

    impl<T> IndexCoordClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::Body>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn get_index_infos(
            &mut self,
            request: impl tonic::IntoRequest<super::super::GetIndexInfosRequest>,
        ) -> std::result::Result<tonic::Response<super::super::GetIndexInfosResponse>, tonic::Status>
        {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::unknown(format!("Service was not ready: {}", e.into()))
            })?;
            let codec = tonic_prost::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/quiver.proto.IndexCoord/GetIndexInfos");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("quiver.proto.IndexCoord", "GetIndexInfos"));
            self.inner.unary(req, path, codec).await
        }
    }
}
