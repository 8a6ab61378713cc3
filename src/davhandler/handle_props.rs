use http::header::{self, HeaderValue};
use http::{Response, StatusCode};
use xmltree::Element;

use crate::backend::{
    DavProp, DavResource, PropName, PropPatch, PropRequest, PropValue, PropfindOptions,
    ProppatchOptions,
};
use crate::body::Body;
use crate::davhandler::DavRequest;
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::ls;
use crate::multistatus::{MultiStatus, NS_DAV_URI};
use crate::xmltree_ext::{self, ElementExt};
use crate::DavResult;

fn prop_name(e: &Element) -> PropName {
    PropName::new(e.namespace.clone().unwrap_or_default(), e.name.clone())
}

// <D:propfind> body. An empty body means allprop.
fn parse_propfind(body: &[u8]) -> DavResult<PropRequest> {
    if body.is_empty() {
        return Ok(PropRequest::All);
    }
    let root = xmltree_ext::parse_dav_body(body, "propfind")?;
    let elem = match root.child_elems().into_iter().next() {
        Some(e) => e,
        None => return Ok(PropRequest::All),
    };
    if elem.is_dav("allprop") {
        Ok(PropRequest::All)
    } else if elem.is_dav("propname") {
        Ok(PropRequest::Names)
    } else if elem.is_dav("prop") {
        Ok(PropRequest::Props(
            elem.child_elems().into_iter().map(prop_name).collect(),
        ))
    } else {
        debug!("propfind: unexpected element {}", elem.name);
        Err(DavError::XmlParseError)
    }
}

// <D:propertyupdate> body, with <D:set> and <D:remove> in document order.
fn parse_proppatch(body: &[u8]) -> DavResult<Vec<PropPatch>> {
    let root = xmltree_ext::parse_dav_body(body, "propertyupdate")?;
    let mut props = Vec::new();
    for elem in root.child_elems() {
        let set = if elem.is_dav("set") {
            true
        } else if elem.is_dav("remove") {
            false
        } else {
            continue;
        };
        for prop in elem.child_elems().into_iter().filter(|e| e.is_dav("prop")) {
            for p in prop.child_elems() {
                props.push(PropPatch {
                    namespace: p.namespace.clone().unwrap_or_default(),
                    name: p.name.clone(),
                    value: if set { Some(p.inner_xml()) } else { None },
                    status: StatusCode::OK,
                });
            }
        }
    }
    if props.is_empty() {
        return Err(DavError::XmlParseError);
    }
    Ok(props)
}

fn multistatus_response(body: bytes::Bytes) -> Response<Body> {
    let mut res = Response::new(Body::from(body));
    *res.status_mut() = StatusCode::MULTI_STATUS;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/xml; charset=\"utf-8\""),
    );
    res
}

impl crate::DavHandler {
    // properties we can fill in if the backend did not.
    async fn live_prop(&self, name: &PropName, path: &DavPath) -> DavResult<Option<DavProp>> {
        if !self.caps.checklock || name.namespace != NS_DAV_URI {
            return Ok(None);
        }
        let value = match name.name.as_str() {
            "lockdiscovery" => {
                let locks = self.lock_manager().query_locks(path).await?;
                PropValue::Xml(ls::lockdiscovery(&locks))
            }
            "supportedlock" => PropValue::Xml(ls::supportedlock()),
            _ => return Ok(None),
        };
        Ok(Some(DavProp::dav(name.name.clone(), value)))
    }

    // split the properties of a resource into found and missing.
    async fn select_props(
        &self,
        res: DavResource,
        path: &DavPath,
        request: &PropRequest,
    ) -> DavResult<(Vec<DavProp>, Vec<PropName>)> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        match request {
            PropRequest::All | PropRequest::Names => {
                found = res.props;
                for name in ["lockdiscovery", "supportedlock"] {
                    let name = PropName::new(NS_DAV_URI, name);
                    if found.iter().any(|p| p.prop_name() == name) {
                        continue;
                    }
                    if let Some(prop) = self.live_prop(&name, path).await? {
                        found.push(prop);
                    }
                }
            }
            PropRequest::Props(names) => {
                for name in names {
                    if let Some(prop) = res.props.iter().find(|p| p.prop_name() == *name) {
                        found.push(prop.clone());
                    } else if let Some(prop) = self.live_prop(name, path).await? {
                        found.push(prop);
                    } else {
                        missing.push(name.clone());
                    }
                }
            }
        }
        Ok((found, missing))
    }

    pub(crate) async fn handle_propfind(
        &self,
        req: &DavRequest,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = req.depth(Depth::Infinity)?;
        let props = parse_propfind(body)?;
        let opts = PropfindOptions {
            path: req.path.clone(),
            depth,
            props,
        };

        trace!("backend propfind {} depth {}", opts.path, opts.depth);
        let resources = self.backend.propfind(&opts).await?;

        let names_only = opts.props == PropRequest::Names;
        let mut ms = MultiStatus::new()?;
        for res in resources {
            let path = DavPath::new(&res.path).with_prefix(&self.prefix);
            let href = path.as_url_string_with_prefix();
            let (found, missing) = self.select_props(res, &path, &opts.props).await?;
            ms.propfind_response(&href, &found, &missing, names_only)?;
        }
        Ok(multistatus_response(ms.finish()?))
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &DavRequest,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let tokens = req.lock_tokens();
        if !self
            .lock_manager()
            .check_lock_status(&req.path, &tokens, false)
            .await?
        {
            return Err(StatusCode::LOCKED.into());
        }

        let mut opts = ProppatchOptions {
            path: req.path.clone(),
            props: parse_proppatch(body)?,
        };
        trace!("backend proppatch {} {} props", opts.path, opts.props.len());
        let description = self.backend.proppatch(&mut opts).await?;

        let mut ms = MultiStatus::new()?;
        ms.proppatch_response(
            &req.path.as_url_string_with_prefix(),
            &opts.props,
            description.as_deref(),
        )?;
        Ok(multistatus_response(ms.finish()?))
    }
}
