// Copyright ⓒ 2024-2025 Peter Morgan <peter.james.morgan@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! ApiVersions, the bootstrap inquiry establishing which API versions a
//! broker speaks.

use std::sync::LazyLock;

use crate::{
    Request, Response, Result,
    scheme::{Field, Kind, Scheme, Value},
};

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ApiVersionsRequest;

static API_VERSIONS_REQUEST_V0: LazyLock<Scheme> = LazyLock::new(|| Scheme::new([]));

static API_VERSIONS_RESPONSE_V0: LazyLock<Scheme> = LazyLock::new(|| {
    Scheme::new([
        Field::new("error_code", Kind::Int16),
        Field::new(
            "api_keys",
            Kind::Array(Box::new(Kind::Scheme(Scheme::new([
                Field::new("api_key", Kind::Int16),
                Field::new("min_version", Kind::Int16),
                Field::new("max_version", Kind::Int16),
            ])))),
        ),
    ])
});

impl Request for ApiVersionsRequest {
    const KEY: i16 = 18;
    const MIN_VERSION: i16 = 0;
    const MAX_VERSION: i16 = 0;

    type Response = ApiVersionsResponse;

    fn scheme(_api_version: i16) -> &'static Scheme {
        &API_VERSIONS_REQUEST_V0
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([])
    }
}

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ApiVersionsResponse {
    pub error_code: i16,
    pub api_keys: Vec<ApiVersion>,
}

impl ApiVersionsResponse {
    pub fn error_code(self, error_code: i16) -> Self {
        Self { error_code, ..self }
    }

    pub fn api_keys(self, api_keys: impl IntoIterator<Item = ApiVersion>) -> Self {
        Self {
            api_keys: api_keys.into_iter().collect(),
            ..self
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ApiVersion {
    pub api_key: i16,
    pub min_version: i16,
    pub max_version: i16,
}

impl ApiVersion {
    pub fn new(api_key: i16, min_version: i16, max_version: i16) -> Self {
        Self {
            api_key,
            min_version,
            max_version,
        }
    }
}

impl Response for ApiVersionsResponse {
    fn scheme(_api_version: i16) -> &'static Scheme {
        &API_VERSIONS_RESPONSE_V0
    }

    fn from_value(value: Value, _api_version: i16) -> Result<Self> {
        let mut fields = value.into_fields()?;

        Ok(Self {
            error_code: fields.int16()?,
            api_keys: fields
                .array()?
                .into_iter()
                .map(|api| {
                    let mut fields = api.into_fields()?;

                    Ok(ApiVersion {
                        api_key: fields.int16()?,
                        min_version: fields.int16()?,
                        max_version: fields.int16()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        })
    }

    fn into_value(self, _api_version: i16) -> Value {
        Value::record([
            Value::Int16(self.error_code),
            Value::array(self.api_keys.into_iter().map(|api| {
                Value::record([
                    Value::Int16(api.api_key),
                    Value::Int16(api.min_version),
                    Value::Int16(api.max_version),
                ])
            })),
        ])
    }
}
