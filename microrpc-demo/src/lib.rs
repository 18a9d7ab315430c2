use microrpc::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetByIdReq {
    pub id: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct GetByIdRsp {
    pub msg: String,
}

#[microrpc::service(name = "user-service")]
pub trait UserService {
    async fn get_by_id(&self, c: &Context, r: &GetByIdReq) -> Result<GetByIdRsp>;

    /// Records a user event. Usually called oneway.
    async fn track(&self, c: &Context, r: &String) -> Result<()>;
}

#[microrpc::service(name = "echo-service")]
pub trait EchoService {
    async fn echo(&self, c: &Context, r: &String) -> Result<String>;
}
